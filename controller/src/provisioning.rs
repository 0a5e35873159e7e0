use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use garden_common::{hal::Provisioner, NetworkConfig, RuntimeConfig};
use tracing::warn;

/// Host stand-in for the Wi-Fi manager. There is no soft AP on a host, so
/// the portal request is only logged; a factory reset really does wipe the
/// stored credentials before restarting.
pub struct HostProvisioner {
    network: NetworkConfig,
    runtime_path: PathBuf,
    restart: Box<dyn FnMut() + Send>,
}

impl HostProvisioner {
    pub fn new(network: NetworkConfig, runtime_path: PathBuf) -> Self {
        Self::with_restart(network, runtime_path, || {
            // A supervisor (systemd, docker) brings the process back.
            std::process::exit(0);
        })
    }

    pub fn with_restart(
        network: NetworkConfig,
        runtime_path: PathBuf,
        restart: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            network,
            runtime_path,
            restart: Box::new(restart),
        }
    }
}

impl Provisioner for HostProvisioner {
    fn enter_config_portal(&mut self) {
        warn!(
            ap_ssid = %self.network.ap_ssid,
            timeout_secs = self.network.portal_timeout_secs,
            "config portal requested; no access point available in host builds"
        );
    }

    fn reset_credentials_and_restart(&mut self) {
        if let Err(err) = clear_stored_credentials(&self.runtime_path) {
            warn!("failed to clear stored wifi credentials: {err:#}");
        }
        warn!("wifi credentials cleared; restarting");
        (self.restart)();
    }
}

fn clear_stored_credentials(path: &Path) -> anyhow::Result<()> {
    let mut runtime = match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => RuntimeConfig::default(),
        Err(err) => return Err(err.into()),
    };
    runtime.network.clear_credentials();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(&runtime)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("garden-provisioning-{}-{name}", std::process::id()))
            .join("runtime.json")
    }

    #[test]
    fn factory_reset_wipes_credentials_and_restarts() {
        let path = scratch_path("reset");
        let mut stored = RuntimeConfig::default();
        stored.network.wifi_ssid = "home".to_string();
        stored.network.wifi_pass = "hunter2".to_string();
        stored.timezone = "UTC".to_string();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_vec(&stored).unwrap()).unwrap();

        let restarts = Arc::new(AtomicUsize::new(0));
        let counter = restarts.clone();
        let mut provisioner =
            HostProvisioner::with_restart(stored.network.clone(), path.clone(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        provisioner.reset_credentials_and_restart();

        let after: RuntimeConfig =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(after.network.wifi_ssid.is_empty());
        assert!(after.network.wifi_pass.is_empty());
        assert_eq!(after.timezone, "UTC");
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn config_portal_request_does_not_restart() {
        let restarts = Arc::new(AtomicUsize::new(0));
        let counter = restarts.clone();
        let mut provisioner = HostProvisioner::with_restart(
            NetworkConfig::default(),
            scratch_path("portal"),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        provisioner.enter_config_portal();

        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }
}
