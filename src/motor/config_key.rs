// Device configuration keys
//
// Keys are sent as the map keys of the packed config-apply payload and must
// match the firmware's strings exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! config_keys {
    ($($(#[$meta:meta])* $variant:ident => $wire:tt,)+) => {
        /// Motor configuration setting
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum ConfigKey {
            $(
                $(#[$meta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl ConfigKey {
            pub const ALL: &'static [ConfigKey] = &[$(ConfigKey::$variant,)+];

            /// Key string understood by the firmware
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ConfigKey::$variant => $wire,)+
                }
            }
        }
    };
}

config_keys! {
    // Safety
    AllowEnable => "allowEn",
    BrakeAtEstop => "brakeEst",
    DriveMaxVoltage => "drvMaxV",

    // Motor
    SensorType => "sensTyp",
    PolePairs => "polePair",
    Kv => "kv",
    PhaseResistance => "phRes",
    PhaseInductance => "phInd",
    /// Encoder pulses per revolution
    Ppr => "ppr",
    PwmFrequency => "pwmFreq",

    // Runtime limits
    VoltageLimit => "vLim",
    CurrentLimit => "iLim",
    VelocityLimit => "velLim",

    // FOC
    FocModulation => "focMod",
    ModulationCentered => "modCtr",
    TorqueControl => "trqCtrl",

    // Sensor
    SensorOffset => "sensOff",
    SensorAlignVoltage => "sensAlV",
    VelocityIndexSearch => "velIdx",
    ZeroElectricAngle => "zeroAng",
    SensorDirection => "sensDir",

    // Velocity loop
    VelocityPidP => "vPidP",
    VelocityPidI => "vPidI",
    VelocityPidD => "vPidD",
    VelocityPidRamp => "vPidRmp",
    VelocityPidLimit => "vPidLim",
    VelocityLpfTf => "vLpfTf",

    // Angle loop
    AngleP => "angP",
    AngleLpfTf => "angLpfTf",

    // Q current loop
    CurrentQPidP => "qPidP",
    CurrentQPidI => "qPidI",
    CurrentQPidD => "qPidD",
    CurrentQPidRamp => "qPidRmp",
    CurrentQPidLimit => "qPidLim",
    CurrentQLpfTf => "qLpfTf",

    // D current loop
    CurrentDPidP => "dPidP",
    CurrentDPidI => "dPidI",
    CurrentDPidD => "dPidD",
    CurrentDPidRamp => "dPidRmp",
    CurrentDPidLimit => "dPidLim",
    CurrentDLpfTf => "dLpfTf",

    BrakeAtNeutral => "brakeNtr",
    ToneAmplitude => "toneAmp",
    StatusLedBrightness => "ledBr",

    // UART watchdog
    UartWatchdogEnabled => "uartWdEn",
    UartWatchdogTimeoutMs => "uartWdTm",

    // Comms
    CommSource => "commSrc",
    UartBaud => "uartBr",
    DeviceUserName => "devUsrNm",
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
