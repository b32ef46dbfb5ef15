use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Identity of the process that produced a fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub machine_name: String,
    pub process_name: String,
    pub process_id: u32,
    pub operating_system: String,
    pub bus_version: String,
}

impl HostInfo {
    /// Host metadata for the current process, computed once.
    #[must_use]
    pub fn current() -> &'static HostInfo {
        static HOST: OnceLock<HostInfo> = OnceLock::new();
        HOST.get_or_init(Self::capture)
    }

    fn capture() -> Self {
        let machine_name = ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "localhost".to_string());

        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();

        Self {
            machine_name,
            process_name,
            process_id: std::process::id(),
            operating_system: std::env::consts::OS.to_string(),
            bus_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_cached_and_describes_this_process() {
        let first = HostInfo::current();
        let second = HostInfo::current();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.process_id, std::process::id());
        assert!(!first.machine_name.is_empty());
        assert_eq!(first.bus_version, env!("CARGO_PKG_VERSION"));
    }
}
