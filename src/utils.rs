use std::path::Path;

/// Resolve a command name the way `execve` will see it. Names containing a
/// slash are used as given; everything else is searched along `paths`.
pub fn search_cmd(cmd: &str, paths: &str) -> Option<String> {
    let cmd = cmd.trim();

    // If command contains a slash, use it directly without PATH search
    if cmd.contains('/') {
        return Path::new(cmd).exists().then(|| cmd.to_string());
    }

    // An empty PATH element means the current directory
    for path in paths.split(':') {
        let dir = if path.is_empty() { "." } else { path };
        let cmd_path = format!("{}/{}", dir, cmd);
        let candidate = Path::new(&cmd_path);
        if candidate.is_file() && is_executable(candidate) {
            return Some(cmd_path);
        }
    }
    None
}

pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = path.metadata() {
        let mode = metadata.permissions().mode();
        return mode & 0o111 != 0; // Check for execute permission
    }
    false
}
