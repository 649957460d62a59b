use std::path::PathBuf;

/// Resolves a leading `~` or `~/` against `$HOME`. `~user` forms and paths
/// without a tilde come back unchanged, as does everything when `HOME` is unset.
pub fn expand_tilde(path: &str) -> PathBuf {
    let relative = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) => match rest.strip_prefix('/') {
            Some(relative) => relative,
            None => return PathBuf::from(path),
        },
        None => return PathBuf::from(path),
    };
    match std::env::var_os("HOME") {
        Some(home) if relative.is_empty() => PathBuf::from(home),
        Some(home) => PathBuf::from(home).join(relative),
        None => PathBuf::from(path),
    }
}
