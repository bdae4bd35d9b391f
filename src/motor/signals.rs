// Telemetry snapshot kept current by unsolicited signal frames

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Angle {
    pub rads: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Velocity {
    pub rad_s: f32,
}

/// Field-oriented current components
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Currents {
    pub i_q: f32,
    pub i_d: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Voltages {
    pub v_q: f32,
    pub v_d: f32,
    /// Back EMF
    pub v_bemf: f32,
    /// Supply voltage
    pub v_in: f32,
}

/// Per-phase voltages (u) and currents (i)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Phases {
    pub u_a: f32,
    pub u_b: f32,
    pub u_c: f32,
    pub i_a: f32,
    pub i_b: f32,
    pub i_c: f32,
}

/// Latest telemetry reported by one motor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MotorSignals {
    /// Last commanded target
    pub target: f32,
    pub angle: Angle,
    pub velocity: Velocity,
    pub currents: Currents,
    pub voltages: Voltages,
    pub phases: Phases,
}

/// Telemetry signal ids (control words of unsolicited signal frames)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Angle = 0x0002,
    Velocity = 0x0003,
    CurrentQ = 0x0004,
    CurrentD = 0x0005,
    VoltageQ = 0x0006,
    VoltageD = 0x0007,
    VoltageBemf = 0x0008,
    VoltageIn = 0x0009,
    PhaseVoltageA = 0x000A,
    PhaseVoltageB = 0x000B,
    PhaseVoltageC = 0x000C,
    PhaseCurrentA = 0x000D,
    PhaseCurrentB = 0x000E,
    PhaseCurrentC = 0x000F,
}

impl Signal {
    pub const ALL: [Signal; 14] = [
        Signal::Angle,
        Signal::Velocity,
        Signal::CurrentQ,
        Signal::CurrentD,
        Signal::VoltageQ,
        Signal::VoltageD,
        Signal::VoltageBemf,
        Signal::VoltageIn,
        Signal::PhaseVoltageA,
        Signal::PhaseVoltageB,
        Signal::PhaseVoltageC,
        Signal::PhaseCurrentA,
        Signal::PhaseCurrentB,
        Signal::PhaseCurrentC,
    ];

    pub fn from_word(word: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|signal| signal.word() == word)
    }

    pub fn word(self) -> u16 {
        self as u16
    }
}

impl MotorSignals {
    /// Store `value` in the field that `signal` reports
    pub fn apply(&mut self, signal: Signal, value: f32) {
        let field = match signal {
            Signal::Angle => &mut self.angle.rads,
            Signal::Velocity => &mut self.velocity.rad_s,
            Signal::CurrentQ => &mut self.currents.i_q,
            Signal::CurrentD => &mut self.currents.i_d,
            Signal::VoltageQ => &mut self.voltages.v_q,
            Signal::VoltageD => &mut self.voltages.v_d,
            Signal::VoltageBemf => &mut self.voltages.v_bemf,
            Signal::VoltageIn => &mut self.voltages.v_in,
            Signal::PhaseVoltageA => &mut self.phases.u_a,
            Signal::PhaseVoltageB => &mut self.phases.u_b,
            Signal::PhaseVoltageC => &mut self.phases.u_c,
            Signal::PhaseCurrentA => &mut self.phases.i_a,
            Signal::PhaseCurrentB => &mut self.phases.i_b,
            Signal::PhaseCurrentC => &mut self.phases.i_c,
        };
        *field = value;
    }
}
