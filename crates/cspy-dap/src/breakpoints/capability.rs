//! Breakpoint types, modes and the per-driver capability table.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::BreakpointError;

/// Coarse classification of a code breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    Auto,
    Hardware,
    Software,
}

impl BreakpointType {
    pub const ALL: [BreakpointType; 3] = [
        BreakpointType::Auto,
        BreakpointType::Hardware,
        BreakpointType::Software,
    ];

    pub fn id(self) -> &'static str {
        match self {
            BreakpointType::Auto => "auto",
            BreakpointType::Hardware => "hardware",
            BreakpointType::Software => "software",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BreakpointType::Auto => "Auto",
            BreakpointType::Hardware => "Hardware",
            BreakpointType::Software => "Software",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.id().eq_ignore_ascii_case(id))
    }
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Fine-grained breakpoint category selectable per breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointMode {
    Auto,
    Software,
    Hardware,
    TraceStart,
    TraceStop,
    TraceFilter,
    Flash,
    TimerStart,
    TimerStop,
}

impl BreakpointMode {
    pub const ALL: [BreakpointMode; 9] = [
        BreakpointMode::Auto,
        BreakpointMode::Software,
        BreakpointMode::Hardware,
        BreakpointMode::TraceStart,
        BreakpointMode::TraceStop,
        BreakpointMode::TraceFilter,
        BreakpointMode::Flash,
        BreakpointMode::TimerStart,
        BreakpointMode::TimerStop,
    ];

    pub fn id(self) -> &'static str {
        match self {
            BreakpointMode::Auto => "auto",
            BreakpointMode::Software => "software",
            BreakpointMode::Hardware => "hardware",
            BreakpointMode::TraceStart => "trace_start",
            BreakpointMode::TraceStop => "trace_stop",
            BreakpointMode::TraceFilter => "trace_filter",
            BreakpointMode::Flash => "flash",
            BreakpointMode::TimerStart => "timer_start",
            BreakpointMode::TimerStop => "timer_stop",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BreakpointMode::Auto => "Auto",
            BreakpointMode::Software => "Software",
            BreakpointMode::Hardware => "Hardware",
            BreakpointMode::TraceStart => "Trace Start",
            BreakpointMode::TraceStop => "Trace Stop",
            BreakpointMode::TraceFilter => "Trace Filter",
            BreakpointMode::Flash => "Flash",
            BreakpointMode::TimerStart => "Timer Start",
            BreakpointMode::TimerStop => "Timer Stop",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.id().eq_ignore_ascii_case(id))
    }

    /// The legacy type a type-like mode corresponds to.
    pub fn as_type(self) -> Option<BreakpointType> {
        match self {
            BreakpointMode::Auto => Some(BreakpointType::Auto),
            BreakpointMode::Hardware => Some(BreakpointType::Hardware),
            BreakpointMode::Software => Some(BreakpointType::Software),
            _ => None,
        }
    }
}

impl fmt::Display for BreakpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Driver families that share breakpoint behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverFamily {
    Simulator,
    GenericHardware,
    Cadi,
    Rh850Emu,
    Rl78Emu,
    AvrEmu,
    RxEmu,
}

impl DriverFamily {
    pub fn breakpoint_types(self) -> &'static [BreakpointType] {
        use BreakpointType::*;
        match self {
            DriverFamily::Simulator | DriverFamily::AvrEmu => &[Auto],
            DriverFamily::GenericHardware | DriverFamily::Cadi | DriverFamily::RxEmu => {
                &[Auto, Hardware, Software]
            }
            DriverFamily::Rh850Emu | DriverFamily::Rl78Emu => &[Software, Hardware],
        }
    }

    pub fn breakpoint_modes(self) -> &'static [BreakpointMode] {
        use BreakpointMode::*;
        match self {
            DriverFamily::Simulator => &[
                Auto,
                TraceStart,
                TraceStop,
                TraceFilter,
                Flash,
                TimerStart,
                TimerStop,
            ],
            DriverFamily::GenericHardware => &[
                Auto,
                Hardware,
                Software,
                TraceStart,
                TraceStop,
                TraceFilter,
                Flash,
            ],
            DriverFamily::Cadi | DriverFamily::RxEmu => &[Auto, Hardware, Software],
            DriverFamily::Rh850Emu | DriverFamily::Rl78Emu => &[Software, Hardware],
            DriverFamily::AvrEmu => &[Auto],
        }
    }

    /// Backend category for a code breakpoint of type `ty`.
    fn code_category(self, ty: BreakpointType) -> &'static str {
        match (self, ty) {
            (DriverFamily::Simulator | DriverFamily::AvrEmu, _) => "STD_CODE2",
            (DriverFamily::GenericHardware | DriverFamily::Cadi, BreakpointType::Auto) => {
                "EMUL_CODE_AUTO"
            }
            (DriverFamily::GenericHardware | DriverFamily::Cadi, BreakpointType::Hardware) => {
                "EMUL_CODE_HARDWARE"
            }
            (DriverFamily::GenericHardware | DriverFamily::Cadi, BreakpointType::Software) => {
                "EMUL_CODE_SOFTWARE"
            }
            (DriverFamily::Rh850Emu, BreakpointType::Hardware) => "EMUL_CODE_HARDWARE",
            (DriverFamily::Rh850Emu, _) => "EMUL_CODE_SOFTWARE",
            (DriverFamily::Rl78Emu, BreakpointType::Hardware) => "HW_CODE",
            (DriverFamily::Rl78Emu, _) => "STD_CODE2",
            (DriverFamily::RxEmu, BreakpointType::Auto) => "STD_CODE2",
            (DriverFamily::RxEmu, BreakpointType::Hardware) => "EMU_HW_CODE",
            (DriverFamily::RxEmu, BreakpointType::Software) => "EMU_SW_CODE",
        }
    }
}

/// One row of the driver table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Driver {
    /// User-facing driver name, as given in launch configurations.
    pub name: &'static str,
    /// Base names of the driver library, without platform prefix/suffix.
    pub library_names: &'static [&'static str],
    pub family: DriverFamily,
    /// Only matches sessions for this target.
    pub target: Option<&'static str>,
    /// Only matches when this argument is among the driver options.
    pub driver_argument: Option<&'static str>,
}

impl Driver {
    pub fn is_simulator(&self) -> bool {
        self.family == DriverFamily::Simulator
    }

    fn matches_context(&self, target: &str, driver_options: &[String]) -> bool {
        self.target.map_or(true, |t| t.eq_ignore_ascii_case(target))
            && self
                .driver_argument
                .map_or(true, |arg| driver_options.iter().any(|opt| opt == arg))
    }
}

macro_rules! driver {
    ($name:expr, $family:ident, [$($lib:expr),+ $(,)?]) => {
        driver!($name, $family, [$($lib),+], None, None)
    };
    ($name:expr, $family:ident, [$($lib:expr),+ $(,)?], $target:expr, $arg:expr) => {
        Driver {
            name: $name,
            library_names: &[$($lib),+],
            family: DriverFamily::$family,
            target: $target,
            driver_argument: $arg,
        }
    };
}

/// Known drivers. Qualified rows (target / driver argument) come before the
/// unqualified row of the same name so the most specific match wins.
pub static DRIVERS: &[Driver] = &[
    driver!("Simulator", Simulator, ["sim", "sim2"]),
    driver!("64-bit Simulator", Simulator, ["imperas"]),
    driver!("I-jet", GenericHardware, ["ijet", "jet"]),
    driver!("J-Link/J-Trace", GenericHardware, ["jlink", "jlink2"]),
    driver!("GDB Server", GenericHardware, ["gdbserv"]),
    driver!("CADI", Cadi, ["cadi"]),
    driver!("TI Stellaris", GenericHardware, ["lmiftdi"]),
    driver!("PE micro", GenericHardware, ["pemicro"]),
    driver!("ST-LINK", GenericHardware, ["stlink", "stlink2"]),
    driver!("TI XDS", GenericHardware, ["xds", "xds2"]),
    driver!("TI MSP-FET", GenericHardware, ["tifet"]),
    driver!("Renesas E2 / E2 Lite for Arm", GenericHardware, ["e2"], Some("arm"), None),
    driver!("Renesas E1/E2/E20", Rh850Emu, ["ocd"], Some("rh850"), Some("e1")),
    driver!("Renesas E1/E2/E20", Rh850Emu, ["ocd"], Some("rh850"), Some("e2")),
    driver!("Renesas E1/E2/E20", Rh850Emu, ["ocd"], Some("rh850"), Some("e20")),
    driver!("Renesas E1/E2/E20", Rl78Emu, ["ocd"], Some("rl78"), Some("e1")),
    driver!("Renesas E1/E2/E20", Rl78Emu, ["ocd"], Some("rl78"), Some("e2")),
    driver!("Renesas E1/E2/E20", Rl78Emu, ["ocd"], Some("rl78"), Some("e20")),
    driver!("Renesas E1/E2/E20", RxEmu, ["e1e20"], Some("rx"), None),
    driver!("Renesas E2 Lite / E2 On-board", RxEmu, ["e2e2l"], Some("rx"), Some("e2lite")),
    driver!("Renesas E2 Lite / E2 On-board", Rl78Emu, ["ocd"], None, Some("e2lite")),
    driver!("EZ-CUBE", Rl78Emu, ["ocd"], None, Some("ezcube")),
    driver!("EZ-CUBE2", RxEmu, ["e2e2l"], Some("rx"), Some("e2lite")),
    driver!("EZ-CUBE2", Rl78Emu, ["ocd"], None, Some("ezcube2")),
    driver!("TK", Rl78Emu, ["ocd"], None, Some("tk")),
    driver!("IECUBE", Rl78Emu, ["iecube"]),
    driver!("Power Debugger", AvrEmu, ["atmelice"], None, Some("--drv_power_debugger")),
    driver!("Atmel-ICE", AvrEmu, ["atmelice"]),
    driver!("AVR ONE!", AvrEmu, ["one"]),
    driver!("Dragon", AvrEmu, ["jtagice-mkii"], None, Some("--drv_dragon")),
    driver!("JTAGICE mkII", AvrEmu, ["jtagice-mkii"]),
    driver!("JTAGICE3", AvrEmu, ["jtagice3"]),
];

/// Fallback for drivers missing from [`DRIVERS`].
const UNKNOWN_DRIVER: Driver = driver!("<unknown>", GenericHardware, ["<unknown>"]);

/// Resolve a driver by display name or library base name, refined by target and driver options.
///
/// Unknown drivers resolve to a generic hardware driver.
pub fn driver_from_name(name: &str, target: &str, driver_options: &[String]) -> Driver {
    let by_name = DRIVERS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name) && d.matches_context(target, driver_options));
    let by_library = || {
        let base = library_base_name(name, target);
        DRIVERS.iter().find(|d| {
            d.library_names.iter().any(|lib| base.ends_with(lib))
                && d.matches_context(target, driver_options)
        })
    };

    match by_name.or_else(by_library) {
        Some(driver) => *driver,
        None => {
            tracing::warn!(
                target: "cspy.dap.breakpoints",
                driver = name,
                "unrecognized driver; assuming generic hardware driver"
            );
            UNKNOWN_DRIVER
        }
    }
}

/// `libarmsim2.so` → `sim2` for target `arm`.
fn library_base_name(file: &str, target: &str) -> String {
    let mut base = file.to_ascii_lowercase();
    if let Some(stripped) = base.strip_prefix("lib") {
        base = stripped.to_owned();
    }
    for suffix in [".so", ".dll"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.to_owned();
        }
    }
    let target = target.to_ascii_lowercase();
    if !target.is_empty() {
        if let Some(stripped) = base.strip_prefix(&target) {
            base = stripped.to_owned();
        }
    }
    base
}

/// Breakpoint types and modes supported by the attached driver.
///
/// Resolved once per session and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointCapability {
    driver: Driver,
    types: Vec<BreakpointType>,
    modes: Vec<BreakpointMode>,
}

impl BreakpointCapability {
    pub fn for_driver(driver: Driver) -> Result<Self, BreakpointError> {
        let types = driver.family.breakpoint_types().to_vec();
        if types.is_empty() {
            return Err(BreakpointError::NoSupportedTypes);
        }
        let modes = driver.family.breakpoint_modes().to_vec();
        if modes.is_empty() {
            return Err(BreakpointError::NoSupportedModes);
        }
        Ok(Self {
            driver,
            types,
            modes,
        })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn supported_types(&self) -> &[BreakpointType] {
        &self.types
    }

    pub fn supported_modes(&self) -> &[BreakpointMode] {
        &self.modes
    }

    pub fn supports_type(&self, ty: BreakpointType) -> bool {
        self.types.contains(&ty)
    }

    pub fn supports_mode(&self, mode: BreakpointMode) -> bool {
        self.modes.contains(&mode)
    }

    /// `requested` if supported, otherwise the first supported type.
    pub fn initial_type(&self, requested: Option<BreakpointType>) -> BreakpointType {
        match requested {
            Some(ty) if self.supports_type(ty) => ty,
            _ => self.types[0],
        }
    }

    /// `requested` if supported, otherwise the first supported mode.
    pub fn initial_mode(&self, requested: Option<BreakpointMode>) -> BreakpointMode {
        match requested {
            Some(mode) if self.supports_mode(mode) => mode,
            _ => self.modes[0],
        }
    }

    /// Backend category for a breakpoint in `mode`. `Auto` resolves through `default_type`.
    pub fn category(&self, mode: BreakpointMode, default_type: BreakpointType) -> &'static str {
        let family = self.driver.family;
        match mode {
            BreakpointMode::Auto => family.code_category(default_type),
            BreakpointMode::Hardware => family.code_category(BreakpointType::Hardware),
            BreakpointMode::Software => family.code_category(BreakpointType::Software),
            BreakpointMode::TraceStart => "EMUL_TRACE_START",
            BreakpointMode::TraceStop => "EMUL_TRACE_STOP",
            BreakpointMode::TraceFilter => "EMUL_TRACE_FILTER",
            BreakpointMode::Flash => "EMUL_FLASH",
            BreakpointMode::TimerStart => "EMUL_TIMER_START",
            BreakpointMode::TimerStop => "EMUL_TIMER_STOP",
        }
    }
}
