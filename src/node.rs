use log::{debug, info};
use std::ffi::CStr;

/// Environment variable consulted for the node name
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Host name reported by the operating system
pub fn hostname() -> std::io::Result<String> {
    let mut buffer = [0u8; 256];
    // SAFETY: the buffer is valid for its full length and gethostname writes at most that many bytes.
    let result = unsafe { libc::gethostname(buffer.as_mut_ptr().cast(), buffer.len()) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Truncated names are not guaranteed to be NUL terminated.
    let last = buffer.len() - 1;
    buffer[last] = 0;
    let name = CStr::from_bytes_until_nul(&buffer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(name.to_string_lossy().into_owned())
}

/// Pick the node name: explicit override, then config, then environment, then OS hostname
pub fn resolve_node_name(
    override_name: Option<&str>,
    configured: Option<&str>,
    environment: Option<&str>,
) -> std::io::Result<String> {
    let candidates = [
        ("command line override", override_name),
        ("configuration file", configured),
        (NODE_NAME_ENV, environment),
    ];
    for (origin, candidate) in candidates {
        if let Some(name) = candidate.map(str::trim).filter(|n| !n.is_empty()) {
            info!("Using node name {:?} from {}", name, origin);
            return Ok(name.to_string());
        }
    }

    debug!("No node name configured, falling back to the OS hostname");
    let name = hostname()?;
    info!("Using node name {:?} from hostname", name);
    Ok(name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        assert_eq!(
            resolve_node_name(Some("flag"), Some("file"), Some("env")).unwrap(),
            "flag"
        );
        assert_eq!(
            resolve_node_name(None, Some("file"), Some("env")).unwrap(),
            "file"
        );
        assert_eq!(resolve_node_name(None, None, Some("env")).unwrap(), "env");
        assert_eq!(
            resolve_node_name(Some("  "), None, Some("env")).unwrap(),
            "env"
        );
    }

    #[test]
    fn test_hostname_fallback() {
        let name = resolve_node_name(None, None, None).unwrap();
        assert_eq!(name, hostname().unwrap().to_lowercase());
    }
}
