// Drive-command modes

/// Control mode and target sent to a motor
///
/// Two controls are equal when both the mode and the target match, which is
/// what `KevinbotMc::set` uses to skip redundant transactions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MotorControl {
    /// Sentinel before the first `set`; never transmitted
    #[default]
    Unknown,
    Neutral,
    Coast,
    Brake,
    /// Torque target
    Torque(f32),
    /// Velocity target in rad/s
    Velocity(f32),
}

impl MotorControl {
    /// Mode code transmitted with the set-mode transaction
    pub fn index(&self) -> i8 {
        match self {
            MotorControl::Unknown => -1,
            MotorControl::Neutral => 0,
            MotorControl::Coast => 1,
            MotorControl::Brake => 2,
            MotorControl::Torque(_) => 5,
            MotorControl::Velocity(_) => 6,
        }
    }

    /// Numeric target; modes without one report 0
    pub fn target(&self) -> f32 {
        match self {
            MotorControl::Torque(target) | MotorControl::Velocity(target) => *target,
            _ => 0.0,
        }
    }

    /// Whether both controls use the same mode, ignoring targets
    pub fn same_kind(&self, other: &MotorControl) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MotorControl::Unknown => "unknown",
            MotorControl::Neutral => "neutral",
            MotorControl::Coast => "coast",
            MotorControl::Brake => "brake",
            MotorControl::Torque(_) => "torque",
            MotorControl::Velocity(_) => "velocity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        assert_eq!(MotorControl::Velocity(3.0), MotorControl::Velocity(3.0));
        assert_ne!(MotorControl::Velocity(3.0), MotorControl::Velocity(3.1));
        assert_ne!(MotorControl::Velocity(3.0), MotorControl::Torque(3.0));
        assert_eq!(MotorControl::Brake, MotorControl::Brake);
    }

    #[test]
    fn test_index_and_target() {
        assert_eq!(MotorControl::Unknown.index(), -1);
        assert_eq!(MotorControl::Neutral.index(), 0);
        assert_eq!(MotorControl::Coast.index(), 1);
        assert_eq!(MotorControl::Brake.index(), 2);
        assert_eq!(MotorControl::Torque(0.5).index(), 5);
        assert_eq!(MotorControl::Velocity(1.0).index(), 6);

        assert_eq!(MotorControl::Torque(0.5).target(), 0.5);
        assert_eq!(MotorControl::Coast.target(), 0.0);
    }

    #[test]
    fn test_same_kind() {
        assert!(MotorControl::Velocity(1.0).same_kind(&MotorControl::Velocity(2.0)));
        assert!(!MotorControl::Velocity(1.0).same_kind(&MotorControl::Torque(1.0)));
        assert!(!MotorControl::Unknown.same_kind(&MotorControl::Neutral));
    }

    #[test]
    fn test_names() {
        assert_eq!(MotorControl::Velocity(2.0).name(), "velocity");
        assert_eq!(MotorControl::Torque(2.0).name(), MotorControl::Torque(0.0).name());
        assert_eq!(MotorControl::default().name(), "unknown");
    }
}
