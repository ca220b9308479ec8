//! Board configuration
//!
//! A TOML document describing how a board's header is wired: which
//! peripherals to claim, which pins are inputs and outputs, and the defaults
//! for access upgrades and watching.
//!
//! ```toml
//! [access]
//! auto_upgrade = false
//!
//! [watch]
//! poll_interval_ms = 50
//! edge = "both"
//!
//! [driver]
//! backend = "mmap"
//!
//! [peripherals]
//! i2c = 1
//! pwm = [12]
//!
//! [[inputs]]
//! pin = 7
//! pull = "up"
//!
//! [[outputs]]
//! pin = 11
//! initial = "high"
//! ```

use crate::driver::{Driver, Pull, SimDriver};
use crate::error::{GpioError, Result};
use crate::gpio::{Gpio, GpioSettings};
use crate::header;
use crate::peripheral::{Peripheral, PeripheralClaim};
use crate::pin::{InputPin, OutputPin};
use crate::watch::{EdgeFilter, DEFAULT_POLL_INTERVAL};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Access-mode defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    /// Allow peripheral claims to upgrade restricted access
    pub auto_upgrade: bool,
}

/// Watch defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Edges to report
    pub edge: EdgeFilter,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            edge: EdgeFilter::Both,
        }
    }
}

/// Register backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Memory-mapped hardware registers
    #[default]
    Mmap,
    /// In-memory simulation
    Sim,
}

/// Driver selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub backend: Backend,
    /// Peripheral bus base address; read from the device tree when unset
    pub peripheral_base: Option<u64>,
    /// Restricted window device, `/dev/gpiomem` when unset
    pub gpiomem_path: Option<PathBuf>,
    /// Broad window device, `/dev/mem` when unset
    pub mem_path: Option<PathBuf>,
}

/// Peripherals to claim at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeripheralsConfig {
    /// I2C pin set (0 or 1)
    pub i2c: Option<u8>,
    pub spi: bool,
    /// PWM header pins
    pub pwm: Vec<u8>,
}

/// Output level in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Low,
    High,
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        level == Level::High
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub pin: u8,
    #[serde(default)]
    pub pull: Pull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub pin: u8,
    #[serde(default)]
    pub initial: Level,
}

/// Complete board configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    pub access: AccessConfig,
    pub watch: WatchConfig,
    pub driver: DriverConfig,
    pub peripherals: PeripheralsConfig,
    pub inputs: Vec<InputConfig>,
    pub outputs: Vec<OutputConfig>,
}

/// Everything a configuration acquired
#[derive(Debug)]
pub struct Board {
    pub peripherals: Vec<PeripheralClaim>,
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
}

impl BoardConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GpioError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: BoardConfig =
            toml::from_str(text).map_err(|e| GpioError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Peripheral claims in the order they are made
    pub fn peripherals(&self) -> Vec<Peripheral> {
        let mut list = Vec::new();
        if let Some(pin_set) = self.peripherals.i2c {
            list.push(Peripheral::I2c { pin_set });
        }
        if self.peripherals.spi {
            list.push(Peripheral::Spi);
        }
        list.extend(self.peripherals.pwm.iter().map(|pin| Peripheral::Pwm { pin: *pin }));
        list
    }

    /// Reject invalid pins and pins used twice
    pub fn validate(&self) -> Result<()> {
        if self.watch.poll_interval_ms == 0 {
            return Err(GpioError::Config(
                "watch.poll_interval_ms must be non-zero".to_string(),
            ));
        }

        let mut used: BTreeMap<u8, String> = BTreeMap::new();
        let mut take = |pin: u8, what: String| -> Result<()> {
            if !header::is_gpio(pin) {
                return Err(GpioError::Config(format!(
                    "{} uses pin {}, which is not a GPIO pin",
                    what, pin
                )));
            }
            if let Some(previous) = used.insert(pin, what.clone()) {
                return Err(GpioError::Config(format!(
                    "pin {} is used by both {} and {}",
                    pin, previous, what
                )));
            }
            Ok(())
        };

        for peripheral in self.peripherals() {
            let pins = peripheral
                .pins()
                .map_err(|e| GpioError::Config(e.to_string()))?;
            for (pin, _) in pins {
                take(pin, peripheral.to_string())?;
            }
        }
        for input in &self.inputs {
            take(input.pin, format!("input {}", input.pin))?;
        }
        for output in &self.outputs {
            take(output.pin, format!("output {}", output.pin))?;
        }
        Ok(())
    }

    pub fn settings(&self) -> GpioSettings {
        GpioSettings {
            auto_upgrade: self.access.auto_upgrade,
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            default_edge: self.watch.edge,
        }
    }

    /// Build the configured register driver
    pub fn driver(&self) -> Result<Box<dyn Driver>> {
        match self.driver.backend {
            Backend::Sim => Ok(Box::new(SimDriver::new())),
            #[cfg(unix)]
            Backend::Mmap => {
                use crate::driver::{MmapConfig, MmapDriver};
                let mut mmap = MmapConfig {
                    peripheral_base: self.driver.peripheral_base,
                    ..MmapConfig::default()
                };
                if let Some(path) = &self.driver.gpiomem_path {
                    mmap.gpiomem_path = path.clone();
                }
                if let Some(path) = &self.driver.mem_path {
                    mmap.mem_path = path.clone();
                }
                Ok(Box::new(MmapDriver::new(mmap)))
            }
            #[cfg(not(unix))]
            Backend::Mmap => Err(GpioError::Config(
                "the mmap backend is only available on unix".to_string(),
            )),
        }
    }

    /// Build a context over the configured driver
    pub fn build(&self) -> Result<Gpio> {
        Ok(Gpio::new(self.driver()?, self.settings()))
    }

    /// Claim peripherals, then inputs, then outputs
    pub fn apply(&self, gpio: &Gpio) -> Result<Board> {
        let auto_upgrade = gpio.settings().auto_upgrade;
        let peripherals = self
            .peripherals()
            .into_iter()
            .map(|p| gpio.claim(p, auto_upgrade))
            .collect::<Result<Vec<_>>>()?;
        let inputs = self
            .inputs
            .iter()
            .map(|i| gpio.acquire_input(i.pin, i.pull))
            .collect::<Result<Vec<_>>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|o| gpio.acquire_output(o.pin, o.initial.into()))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "Board configured: {} peripheral(s), {} input(s), {} output(s)",
            peripherals.len(),
            inputs.len(),
            outputs.len()
        );
        Ok(Board {
            peripherals,
            inputs,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AccessMode;
    use crate::registry::PinRole;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[access]
auto_upgrade = false

[watch]
poll_interval_ms = 50
edge = "falling"

[driver]
backend = "sim"

[peripherals]
i2c = 1
pwm = [12]

[[inputs]]
pin = 7
pull = "up"

[[inputs]]
pin = 13

[[outputs]]
pin = 11
initial = "high"
"#;

    #[test]
    fn test_parse_sample() {
        let config = BoardConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.driver.backend, Backend::Sim);
        assert_eq!(config.inputs[0].pull, Pull::Up);
        assert_eq!(config.inputs[1].pull, Pull::Off);
        assert_eq!(config.outputs[0].initial, Level::High);
        assert_eq!(
            config.peripherals(),
            vec![Peripheral::I2c { pin_set: 1 }, Peripheral::Pwm { pin: 12 }]
        );

        let settings = config.settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(50));
        assert_eq!(settings.default_edge, EdgeFilter::Falling);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BoardConfig::from_toml("").unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.settings(), GpioSettings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = BoardConfig::load(file.path()).unwrap();
        assert_eq!(config.outputs.len(), 1);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            BoardConfig::load(&missing),
            Err(GpioError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_bad_pins() {
        let power = "[[inputs]]\npin = 2\n";
        assert!(matches!(
            BoardConfig::from_toml(power),
            Err(GpioError::Config(msg)) if msg.contains("not a GPIO pin")
        ));

        let twice = "[peripherals]\ni2c = 1\n\n[[outputs]]\npin = 3\n";
        assert!(matches!(
            BoardConfig::from_toml(twice),
            Err(GpioError::Config(msg)) if msg.contains("pin 3 is used by both")
        ));

        let bad_pwm = "[peripherals]\npwm = [11]\n";
        assert!(BoardConfig::from_toml(bad_pwm).is_err());

        let zero = "[watch]\npoll_interval_ms = 0\n";
        assert!(BoardConfig::from_toml(zero).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(BoardConfig::from_toml("[access]\nautoupgrade = true\n").is_err());
        assert!(BoardConfig::from_toml("[[outputs]]\npin = 11\ninitial = \"on\"\n").is_err());
    }

    #[test]
    fn test_apply_claims_peripherals_first() {
        let config = BoardConfig::from_toml(SAMPLE).unwrap();
        let gpio = config.build().unwrap();
        let board = config.apply(&gpio).unwrap();

        assert_eq!(gpio.access_mode(), Some(AccessMode::Broad));
        assert_eq!(board.peripherals.len(), 2);
        assert_eq!(gpio.role_of(3).unwrap(), PinRole::AlternateFunction);
        assert_eq!(gpio.role_of(12).unwrap(), PinRole::AlternateFunction);
        assert_eq!(board.inputs.len(), 2);
        assert!(board.outputs[0].state().unwrap());
        assert_eq!(gpio.role_of(11).unwrap(), PinRole::Output);
    }
}
