/// Returns the default configuration file path.
/// Search order:
/// 1. `VKBRIDGE_CONFIG` environment variable
/// 2. System-wide config: `%PROGRAMDATA%\vkbridge\vkbridge.toml` (Windows) or `/etc/vkbridge/vkbridge.toml`
/// 3. Local fallback: `./vkbridge.toml`
pub fn default_config_path() -> String {
    if let Ok(path) = std::env::var("VKBRIDGE_CONFIG") {
        return path;
    }
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        let system_path = format!(r"{}\vkbridge\vkbridge.toml", programdata);
        if std::path::Path::new(&system_path).exists() {
            return system_path;
        }
    }
    #[cfg(not(windows))]
    {
        let system_path = "/etc/vkbridge/vkbridge.toml";
        if std::path::Path::new(system_path).exists() {
            return system_path.to_string();
        }
    }
    "vkbridge.toml".to_string()
}

/// Returns the platform name string.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "windows")]
    { "windows" }
    #[cfg(target_os = "linux")]
    { "linux" }
    #[cfg(target_os = "macos")]
    { "macos" }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    { "unknown" }
}
