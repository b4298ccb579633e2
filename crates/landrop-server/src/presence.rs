use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use landrop_shared::constants::LIVENESS_WINDOW;
use landrop_shared::types::{Device, DeviceId, DeviceKind, DeviceStatus};

/// Patch applied by `device-update`: absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub status: Option<DeviceStatus>,
}

/// Who is reachable right now. Owns every `Device` record; everyone else
/// refers to devices by id.
#[derive(Debug)]
pub struct PresenceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
    liveness_window: Duration,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new(LIVENESS_WINDOW)
    }
}

impl PresenceRegistry {
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            liveness_window,
        }
    }

    /// Upsert on `device-register`: name and kind are taken from the
    /// message, status resets to `available`, last-seen to now.
    pub async fn register(&self, id: DeviceId, name: String, kind: DeviceKind) -> Device {
        let device = Device {
            id: id.clone(),
            name,
            kind,
            status: DeviceStatus::Available,
            last_seen: Utc::now(),
        };

        let mut devices = self.devices.write().await;
        devices.insert(id.clone(), device.clone());
        debug!(device = %id, "Device registered");
        device
    }

    /// Apply a `device-update` patch; stamps last-seen. Returns the
    /// updated record, or `None` for an unknown device.
    pub async fn update(&self, id: &DeviceId, patch: DevicePatch) -> Option<Device> {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id)?;

        if let Some(name) = patch.name {
            device.name = name;
        }
        if let Some(status) = patch.status {
            device.status = status;
        }
        device.last_seen = Utc::now();
        Some(device.clone())
    }

    /// Flip to `offline` without removing the record, so the device's
    /// transfer history stays resolvable.
    pub async fn mark_offline(&self, id: &DeviceId) {
        let mut devices = self.devices.write().await;
        if let Some(device) = devices.get_mut(id) {
            device.status = DeviceStatus::Offline;
            debug!(device = %id, "Device marked offline");
        }
    }

    pub async fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.read().await.get(id).cloned()
    }

    /// Every reachable device, optionally excluding one id (a client never
    /// sees itself in its own device list).
    pub async fn list_reachable(&self, exclude: Option<&DeviceId>) -> Vec<Device> {
        let now = Utc::now();
        let devices = self.devices.read().await;
        let mut reachable: Vec<Device> = devices
            .values()
            .filter(|d| d.is_reachable(now, self.liveness_window) && Some(&d.id) != exclude)
            .cloned()
            .collect();
        reachable.sort_by(|a, b| a.name.cmp(&b.name));
        reachable
    }

    /// Flip records past the liveness window to `offline`. Returns whether
    /// anything changed, so the caller knows to re-broadcast the list.
    pub async fn sweep_stale(&self) -> bool {
        let now = Utc::now();
        let mut devices = self.devices.write().await;
        let mut changed = false;
        for device in devices.values_mut() {
            if device.status != DeviceStatus::Offline
                && !device.is_reachable(now, self.liveness_window)
            {
                device.status = DeviceStatus::Offline;
                changed = true;
                debug!(device = %device.id, "Liveness expired");
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_register_resets_status() {
        let registry = PresenceRegistry::default();
        let id = DeviceId::from("dev-a");

        registry
            .register(id.clone(), "A".into(), DeviceKind::Laptop)
            .await;
        registry
            .update(
                &id,
                DevicePatch {
                    status: Some(DeviceStatus::Busy),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let again = registry
            .register(id.clone(), "A renamed".into(), DeviceKind::Laptop)
            .await;
        assert_eq!(again.status, DeviceStatus::Available);
        assert_eq!(again.name, "A renamed");
    }

    #[tokio::test]
    async fn test_list_reachable_excludes_caller_and_stale() {
        let registry = PresenceRegistry::default();
        let a = DeviceId::from("a");
        let b = DeviceId::from("b");
        let c = DeviceId::from("c");

        registry.register(a.clone(), "A".into(), DeviceKind::Laptop).await;
        registry.register(b.clone(), "B".into(), DeviceKind::Mobile).await;
        registry.register(c.clone(), "C".into(), DeviceKind::Tablet).await;

        // Age C past the liveness window without touching its status.
        {
            let mut devices = registry.devices.write().await;
            devices.get_mut(&c).unwrap().last_seen = Utc::now() - Duration::seconds(301);
        }

        let listed = registry.list_reachable(Some(&a)).await;
        let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_mark_offline_keeps_record() {
        let registry = PresenceRegistry::default();
        let id = DeviceId::from("dev");
        registry
            .register(id.clone(), "D".into(), DeviceKind::Mobile)
            .await;

        registry.mark_offline(&id).await;

        let device = registry.get(&id).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(registry.list_reachable(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_case_sensitive_ids() {
        let registry = PresenceRegistry::default();
        registry
            .register(DeviceId::from("Dev"), "Upper".into(), DeviceKind::Laptop)
            .await;
        registry
            .register(DeviceId::from("dev"), "Lower".into(), DeviceKind::Laptop)
            .await;

        assert_eq!(registry.list_reachable(None).await.len(), 2);
        assert_eq!(
            registry.get(&DeviceId::from("Dev")).await.unwrap().name,
            "Upper"
        );
    }

    #[tokio::test]
    async fn test_configured_window_overrides_default() {
        let registry = PresenceRegistry::new(std::time::Duration::from_secs(10));
        let id = DeviceId::from("edge");
        registry
            .register(id.clone(), "Edge".into(), DeviceKind::Laptop)
            .await;
        {
            let mut devices = registry.devices.write().await;
            // Inside the default 300 s window, outside the configured one.
            devices.get_mut(&id).unwrap().last_seen = Utc::now() - Duration::seconds(60);
        }

        assert!(registry.list_reachable(None).await.is_empty());
        assert!(registry.sweep_stale().await);
    }

    #[tokio::test]
    async fn test_sweep_flips_stale() {
        let registry = PresenceRegistry::default();
        let id = DeviceId::from("old");
        registry
            .register(id.clone(), "Old".into(), DeviceKind::Laptop)
            .await;
        {
            let mut devices = registry.devices.write().await;
            devices.get_mut(&id).unwrap().last_seen = Utc::now() - Duration::seconds(400);
        }

        assert!(registry.sweep_stale().await);
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            DeviceStatus::Offline
        );
        // Second sweep finds nothing new.
        assert!(!registry.sweep_stale().await);
    }
}
