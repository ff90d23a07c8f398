//! Emulated client device identity.
//!
//! The broker and the registration endpoint expect an Android client. This
//! module holds the descriptor of that device and derives the values both
//! sides key on:
//! - a stable `android-…` id derived from the device uuid
//! - the `FBAN/MQTT` user agent sent in the CONNECT payload
//!
//! The descriptor is plain data; persistence happens through
//! [`crate::config::Config`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::PACKAGE_NAME;

/// Descriptor of the emulated Android device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device uuid (`guid` / `_uuid` in API calls).
    pub uuid: Uuid,
    /// Phone id.
    pub phone_id: Uuid,
    /// `android-` + 16 hex chars, derived from `uuid`.
    pub android_id: String,
    /// Manufacturer, e.g. "samsung".
    pub manufacturer: String,
    /// Brand, e.g. "samsung".
    pub brand: String,
    /// Model, e.g. "SM-G930F".
    pub model: String,
    /// Android release, e.g. "8.0.0".
    pub android_release: String,
    /// Android SDK level.
    pub android_sdk: u32,
    /// Screen density in dpi.
    pub dpi: u32,
    /// Screen width in pixels.
    pub width: u32,
    /// Screen height in pixels.
    pub height: u32,
    /// Client application version.
    pub app_version: String,
    /// Client application build number.
    pub app_version_code: String,
    /// Locale, e.g. "en_US".
    pub locale: String,
}

impl DeviceDescriptor {
    /// Build a descriptor for the reference device, keyed on `uuid`.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            phone_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, uuid.as_bytes()),
            android_id: derive_android_id(&uuid),
            manufacturer: "samsung".to_string(),
            brand: "samsung".to_string(),
            model: "SM-G930F".to_string(),
            android_release: "8.0.0".to_string(),
            android_sdk: 26,
            dpi: 640,
            width: 1440,
            height: 2560,
            app_version: "121.0.0.29.119".to_string(),
            app_version_code: "185203708".to_string(),
            locale: "en_US".to_string(),
        }
    }

    /// Build a descriptor for a freshly generated device.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Build the `FBAN/MQTT` user agent announced in CONNECT.
    #[must_use]
    pub fn user_agent(&self) -> String {
        let density = f64::from(self.dpi) / 160.0;
        format!(
            "[FBAN/MQTT;FBAV/{app};FBBV/{code};FBDM/{{density={density:.1},width={w},height={h}}};\
             FBLC/{locale};FBCR/;FBMF/{mf};FBBD/{brand};FBPN/{pkg};FBDV/{model};\
             FBSV/{release};FBLR/0;FBBK/1;FBCA/armeabi-v7a:armeabi;]",
            app = self.app_version,
            code = self.app_version_code,
            w = self.width,
            h = self.height,
            locale = self.locale,
            mf = self.manufacturer,
            brand = self.brand,
            pkg = PACKAGE_NAME,
            model = self.model,
            release = self.android_release,
        )
    }
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self::generate()
    }
}

/// Derive the `android-<16 hex>` id from the device uuid.
fn derive_android_id(uuid: &Uuid) -> String {
    let digest = Sha256::digest(uuid.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("android-{hex}")
}
