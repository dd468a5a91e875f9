//! What the flow provisions.

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::service::{ImageDownload, VmOptions};

/// Length of generated VM names (without prefix).
pub const NAME_LENGTH: usize = 7;

/// Cloud image to stage on the node and import as the boot disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Download request for the node.
    pub download: ImageDownload,

    /// Storage the imported disk is allocated on.
    pub target_storage: String,
}

impl ImageSource {
    /// `scsi0` value importing the staged file as a qcow2 disk.
    pub fn disk_option(&self) -> String {
        format!(
            "{}:0,import-from={},format=qcow2",
            self.target_storage,
            self.download.volume_id()
        )
    }
}

/// Input to one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPlan {
    /// VM name, sent with the create request.
    pub name: String,

    /// Options applied by the configure step.
    pub options: VmOptions,

    /// Optional image staged before the VM is allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSource>,
}

impl FlowPlan {
    pub fn new(name: impl Into<String>, options: VmOptions) -> Self {
        Self {
            name: name.into(),
            options,
            image: None,
        }
    }

    /// Stage `image` first and boot from it.
    #[must_use]
    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.image = Some(image);
        self
    }

    /// Options sent with the create request.
    pub fn create_options(&self) -> VmOptions {
        VmOptions::new().with("name", self.name.as_str())
    }

    /// Options sent with the configure request.
    ///
    /// Adds the image import as `scsi0` unless the caller set one.
    pub fn configure_options(&self) -> VmOptions {
        let mut options = self.options.clone();
        if let Some(image) = &self.image {
            if !options.contains("scsi0") {
                options.insert("scsi0", image.disk_option());
            }
        }
        options
    }
}

/// Baseline guest: 2 cores, 4 GiB, virtio NIC on `vmbr0`, q35 with agent.
pub fn default_options() -> VmOptions {
    VmOptions::new()
        .with("cores", 2)
        .with("memory", 4096)
        .with("net0", "virtio,bridge=vmbr0")
        .with("scsihw", "virtio-scsi-pci")
        .with("boot", "c")
        .with("bootdisk", "virtio0")
        .with("agent", 1)
        .with("vga", "qxl")
        .with("machine", "q35")
}

/// Random lowercase name of `len` characters.
pub fn random_name(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::OptionValue;

    fn image() -> ImageSource {
        ImageSource {
            download: ImageDownload {
                storage: "local".to_string(),
                url: "https://example.com/leap.qcow2".to_string(),
                filename: "leap.qcow2".to_string(),
            },
            target_storage: "local-lvm".to_string(),
        }
    }

    #[test]
    fn test_random_name() {
        let name = random_name(NAME_LENGTH);
        assert_eq!(name.len(), NAME_LENGTH);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_configure_options_add_image_disk() {
        let plan = FlowPlan::new("alpha", default_options()).with_image(image());
        let options = plan.configure_options();

        assert_eq!(
            options.get("scsi0"),
            Some(&OptionValue::Str(
                "local-lvm:0,import-from=local:import/leap.qcow2,format=qcow2".to_string()
            ))
        );
        assert_eq!(options.get("cores"), Some(&OptionValue::Int(2)));
    }

    #[test]
    fn test_explicit_scsi0_wins() {
        let options = default_options().with("scsi0", "local-lvm:32");
        let plan = FlowPlan::new("alpha", options).with_image(image());

        assert_eq!(
            plan.configure_options().get("scsi0"),
            Some(&OptionValue::Str("local-lvm:32".to_string()))
        );
    }

    #[test]
    fn test_create_options_carry_name_only() {
        let plan = FlowPlan::new("alpha", default_options());
        let create = plan.create_options();
        assert_eq!(create.len(), 1);
        assert_eq!(create.get("name"), Some(&OptionValue::Str("alpha".into())));
    }
}
