//! Fixed addresses in the simulated ACE 1.5 memory map.

/// HDA GCTL: writing 1 takes the audio device out of reset.
pub const HDA_GCTL: u32 = 0x0000_0008;

/// HfIPC0CTL: IPC enable bits.
pub const HFIPC0CTL: u32 = 0x2007_3228;

/// HfDSSCS: DSP subsystem control/status.
pub const HFDSSCS: u32 = 0x2000_1000;

/// Value written to [`HDA_GCTL`].
pub const HDA_GCTL_RESET: u32 = 1;

/// Value written to [`HFIPC0CTL`].
pub const HFIPC0CTL_ENABLE: u32 = 3;

/// Value written to [`HFDSSCS`] to power the DSP on.
pub const HFDSSCS_POWER_ON: u32 = 1 << 16;

/// Trace winstream header in HP-SRAM (memory window 3).
///
/// The simulator does not implement the window mapping in PCI space, so
/// the buffer is read straight out of HP-SRAM.
pub const TRACE_WINDOW: u32 = 0x3002_a000;

/// A register write performed during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Register name, for logs.
    pub name: &'static str,
    /// Register address.
    pub address: u32,
    /// Value written.
    pub value: u32,
}

/// Register writes that release the DSP after HELLO, in issue order.
pub const STARTUP_WRITES: [RegisterWrite; 3] = [
    RegisterWrite {
        name: "HDA GCTL",
        address: HDA_GCTL,
        value: HDA_GCTL_RESET,
    },
    RegisterWrite {
        name: "HfIPC0CTL",
        address: HFIPC0CTL,
        value: HFIPC0CTL_ENABLE,
    },
    RegisterWrite {
        name: "HfDSSCS",
        address: HFDSSCS,
        value: HFDSSCS_POWER_ON,
    },
];
