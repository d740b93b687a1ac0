use crate::{common::*, model::YoloInit};

pub use model::*;

pub static CONFIG_VERSION: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("0.1.0").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    pub model: ModelConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: Version::new(0, 1, 0),
            model: ModelConfig::default(),
        }
    }
}

mod model {
    use super::*;

    /// Model configuration.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// The number of boxes predicted per grid cell.
        pub num_boxes: usize,
        /// The number of object classes.
        pub num_classes: usize,
        /// The device where the model runs on.
        #[serde(with = "tch_serde::serde_device", default = "default_device")]
        pub device: Device,
    }

    impl ModelConfig {
        pub fn yolo_init(&self) -> YoloInit {
            YoloInit {
                num_boxes: self.num_boxes,
                num_classes: self.num_classes,
            }
        }
    }

    impl Default for ModelConfig {
        fn default() -> Self {
            Self {
                num_boxes: 2,
                num_classes: 1,
                device: default_device(),
            }
        }
    }

    fn default_device() -> Device {
        Device::Cpu
    }
}

pub fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let version = Version::parse(&text).map_err(|err| {
        D::Error::custom(format!(
            "failed to parse version number '{}': {:?}",
            text, err
        ))
    })?;

    if !CONFIG_VERSION.matches(&version) {
        return Err(D::Error::custom(format!(
            "incompatible version: get '{}', but it is incompatible with requirement '{}'",
            version, &*CONFIG_VERSION,
        )));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_test() -> Result<()> {
        let config: Config = json5::from_str(
            r#"{
                version: "0.1.0",
                model: { num_boxes: 3, num_classes: 20 },
            }"#,
        )?;
        assert_eq!(config.model.num_boxes, 3);
        assert_eq!(config.model.num_classes, 20);
        assert_eq!(config.model.device, Device::Cpu);
        assert_eq!(config.model.yolo_init().num_channels(), 35);
        Ok(())
    }

    #[test]
    fn incompatible_version_test() {
        let result: Result<Config, _> = json5::from_str(
            r#"{
                version: "1.2.0",
                model: { num_boxes: 2, num_classes: 1 },
            }"#,
        );
        assert!(result.is_err());
    }
}
