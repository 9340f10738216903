use crate::prelude::*;
use crate::pi30::command::strip_trailer;

use enum_dispatch::*;
use nom::{
    character::complete::{anychar, char},
    combinator::rest,
    sequence::preceded,
    IResult,
};
use serde::Serialize;

/// QPIGS needs tokens 0..=16 plus the two skipped ones; token 19 is optional.
pub const QPIGS_MIN_TOKENS: usize = 19;
pub const QPIGS2_MIN_TOKENS: usize = 3;
pub const QPIRI_MIN_TOKENS: usize = 15;

/// Negative acknowledgement: the inverter rejected or does not know the query.
const NAK: &str = "(NAK";

// RawResponse {{{
/// Text read back for one query. Empty when the exchange timed out or failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse(String);

impl RawResponse {
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Decodes bytes off the wire: drops the CR/CRC trailer, maps every
    /// non-ASCII byte to U+FFFD and trims surrounding whitespace.
    pub fn from_bytes(input: &[u8]) -> Self {
        let decoded: String = strip_trailer(input)
            .iter()
            .map(|&b| {
                if b.is_ascii() {
                    b as char
                } else {
                    char::REPLACEMENT_CHARACTER
                }
            })
            .collect();

        Self(decoded.trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for anything that looks like a response frame, NAK included.
    pub fn is_frame(&self) -> bool {
        self.0.starts_with('(')
    }

    pub fn is_nak(&self) -> bool {
        self.0.starts_with(NAK)
    }
}

impl From<&str> for RawResponse {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RawResponse {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
} // }}}

// framing helpers {{{
fn frame_body(input: &str) -> IResult<&str, &str> {
    preceded(char('('), rest)(input)
}

fn mode_char(input: &str) -> IResult<&str, char> {
    preceded(char('('), anychar)(input)
}

/// Content after the leading `(`, or None for noise and timeouts. A NAK is
/// still a frame; the family parsers decide what it yields.
fn body(response: &str) -> Option<&str> {
    frame_body(response).ok().map(|(_, body)| body)
}

fn tokens(command: Command, response: &str, min: usize) -> Option<Vec<&str>> {
    let parts: Vec<&str> = body(response)?.split_whitespace().collect();
    if parts.len() < min {
        debug!(
            "{}: expected at least {} fields, got {}",
            command,
            min,
            parts.len()
        );
        return None;
    }
    Some(parts)
}

#[derive(Debug)]
struct FieldError {
    index: usize,
    token: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field {} ({:?}) is not a number", self.index, self.token)
    }
}

fn field<T: FromStr>(parts: &[&str], index: usize) -> Result<T, FieldError> {
    let token = parts.get(index).copied().unwrap_or_default();
    token.parse().map_err(|_| FieldError {
        index,
        token: token.to_owned(),
    })
}

/// Runs a positional decode; a single bad field discards the whole record.
fn decode<T>(command: Command, f: impl FnOnce() -> Result<T, FieldError>) -> Option<T> {
    match f() {
        Ok(record) => Some(record),
        Err(err) => {
            warn!("failed to parse {}: {}", command, err);
            None
        }
    }
} // }}}

#[enum_dispatch]
pub trait Record {
    /// Flattened `(key, value)` pairs in publication order.
    fn fields(&self) -> Vec<(&'static str, Value)>;
}

// GeneralStatus (QPIGS) {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeneralStatus {
    pub grid_voltage: f64,
    pub grid_frequency: f64,
    pub ac_output_voltage: f64,
    pub ac_output_frequency: f64,
    pub ac_output_apparent_power: i32,
    pub ac_output_active_power: i32,
    pub output_load_percent: i32,
    pub bus_voltage: i32,
    pub battery_voltage: f64,
    pub battery_charging_current: i32,
    pub battery_capacity: i32,
    pub inverter_heat_sink_temperature: i32,
    pub pv_input_current: f64,
    pub pv_input_voltage: f64,
    pub battery_voltage_from_scc: f64,
    pub battery_discharge_current: i32,
    pub device_status: String,
    // tokens 17 and 18 are not decoded
    pub pv_input_power: i32,
}

impl GeneralStatus {
    pub fn parse(response: &str) -> Option<Self> {
        let parts = tokens(Command::Qpigs, response, QPIGS_MIN_TOKENS)?;

        decode(Command::Qpigs, || {
            Ok(Self {
                grid_voltage: field(&parts, 0)?,
                grid_frequency: field(&parts, 1)?,
                ac_output_voltage: field(&parts, 2)?,
                ac_output_frequency: field(&parts, 3)?,
                ac_output_apparent_power: field(&parts, 4)?,
                ac_output_active_power: field(&parts, 5)?,
                output_load_percent: field(&parts, 6)?,
                bus_voltage: field(&parts, 7)?,
                battery_voltage: field(&parts, 8)?,
                battery_charging_current: field(&parts, 9)?,
                battery_capacity: field(&parts, 10)?,
                inverter_heat_sink_temperature: field(&parts, 11)?,
                pv_input_current: field(&parts, 12)?,
                pv_input_voltage: field(&parts, 13)?,
                battery_voltage_from_scc: field(&parts, 14)?,
                battery_discharge_current: field(&parts, 15)?,
                device_status: parts[16].to_owned(),
                pv_input_power: if parts.len() > 19 {
                    field(&parts, 19)?
                } else {
                    0
                },
            })
        })
    }
}

impl Record for GeneralStatus {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("grid_voltage", self.grid_voltage.into()),
            ("grid_frequency", self.grid_frequency.into()),
            ("ac_output_voltage", self.ac_output_voltage.into()),
            ("ac_output_frequency", self.ac_output_frequency.into()),
            ("ac_output_apparent_power", self.ac_output_apparent_power.into()),
            ("ac_output_active_power", self.ac_output_active_power.into()),
            ("output_load_percent", self.output_load_percent.into()),
            ("bus_voltage", self.bus_voltage.into()),
            ("battery_voltage", self.battery_voltage.into()),
            ("battery_charging_current", self.battery_charging_current.into()),
            ("battery_capacity", self.battery_capacity.into()),
            (
                "inverter_heat_sink_temperature",
                self.inverter_heat_sink_temperature.into(),
            ),
            ("pv_input_current", self.pv_input_current.into()),
            ("pv_input_voltage", self.pv_input_voltage.into()),
            ("battery_voltage_from_scc", self.battery_voltage_from_scc.into()),
            ("battery_discharge_current", self.battery_discharge_current.into()),
            ("device_status", self.device_status.as_str().into()),
            ("pv_input_power", self.pv_input_power.into()),
        ]
    }
} // }}}

// Pv2Status (QPIGS2) {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pv2Status {
    pub pv2_input_voltage: f64,
    pub pv2_input_current: f64,
    pub pv2_input_power: i32,
}

impl Pv2Status {
    pub fn parse(response: &str) -> Option<Self> {
        let parts = tokens(Command::Qpigs2, response, QPIGS2_MIN_TOKENS)?;

        decode(Command::Qpigs2, || {
            Ok(Self {
                pv2_input_voltage: field(&parts, 0)?,
                pv2_input_current: field(&parts, 1)?,
                pv2_input_power: field(&parts, 2)?,
            })
        })
    }

    /// Reported when the inverter has no second tracker and rejects QPIGS2.
    pub fn not_installed() -> Self {
        Self {
            pv2_input_voltage: 0.0,
            pv2_input_current: 0.0,
            pv2_input_power: 0,
        }
    }
}

impl Record for Pv2Status {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("pv2_input_voltage", self.pv2_input_voltage.into()),
            ("pv2_input_current", self.pv2_input_current.into()),
            ("pv2_input_power", self.pv2_input_power.into()),
        ]
    }
} // }}}

// WorkingMode (QMODI) {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkingMode {
    PowerOn,
    Standby,
    Line,
    Battery,
    Fault,
    PowerSaving,
    Unknown(char),
}

impl WorkingMode {
    pub fn from_code(code: char) -> Self {
        match code {
            'P' => Self::PowerOn,
            'S' => Self::Standby,
            'L' => Self::Line,
            'B' => Self::Battery,
            'F' => Self::Fault,
            'H' => Self::PowerSaving,
            other => Self::Unknown(other),
        }
    }

    pub fn parse(response: &str) -> Option<Self> {
        body(response)?;
        mode_char(response)
            .ok()
            .map(|(_, code)| Self::from_code(code))
    }
}

impl std::fmt::Display for WorkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PowerOn => write!(f, "Power On"),
            Self::Standby => write!(f, "Standby"),
            Self::Line => write!(f, "Line"),
            Self::Battery => write!(f, "Battery"),
            Self::Fault => write!(f, "Fault"),
            Self::PowerSaving => write!(f, "Power Saving"),
            Self::Unknown(c) => write!(f, "Unknown ({})", c),
        }
    }
}

impl Record for WorkingMode {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![("working_mode", self.to_string().into())]
    }
} // }}}

// Warnings (QPIWS) {{{
/// Named positions of the QPIWS bit array. 12 and 14 are reserved.
pub const WARNING_FLAGS: [(usize, &str); 27] = [
    (0, "inverter_fault"),
    (1, "bus_over"),
    (2, "bus_under"),
    (3, "bus_soft_fail"),
    (4, "line_fail"),
    (5, "opv_short"),
    (6, "inverter_voltage_too_low"),
    (7, "inverter_voltage_too_high"),
    (8, "over_temperature"),
    (9, "fan_locked"),
    (10, "battery_voltage_high"),
    (11, "battery_low_alarm"),
    (13, "battery_under_shutdown"),
    (15, "overload"),
    (16, "eeprom_fault"),
    (17, "inverter_over_current"),
    (18, "inverter_soft_fail"),
    (19, "self_test_fail"),
    (20, "op_dc_voltage_over"),
    (21, "bat_open"),
    (22, "current_sensor_fail"),
    (23, "battery_short"),
    (24, "power_limit"),
    (25, "pv_voltage_high"),
    (26, "mppt_overload_fault"),
    (27, "mppt_overload_warning"),
    (28, "battery_too_low_to_charge"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Warnings {
    /// Defined flags present in the frame, in bit order.
    pub flags: Vec<(&'static str, bool)>,
    pub has_warning: bool,
}

impl Warnings {
    pub fn parse(response: &str) -> Option<Self> {
        let bits: Vec<bool> = body(response)?
            .trim()
            .chars()
            .filter(|c| matches!(c, '0' | '1'))
            .map(|c| c == '1')
            .collect();

        let flags: Vec<(&'static str, bool)> = WARNING_FLAGS
            .iter()
            .filter_map(|&(bit, name)| bits.get(bit).map(|&set| (name, set)))
            .collect();
        let has_warning = flags.iter().any(|&(_, set)| set);

        Some(Self { flags, has_warning })
    }

    pub fn is_set(&self, name: &str) -> Option<bool> {
        self.flags
            .iter()
            .find(|(flag, _)| *flag == name)
            .map(|&(_, set)| set)
    }

    /// Names of the flags currently raised.
    pub fn active(&self) -> Vec<&'static str> {
        self.flags
            .iter()
            .filter(|&&(_, set)| set)
            .map(|&(name, _)| name)
            .collect()
    }
}

impl Record for Warnings {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut r: Vec<(&'static str, Value)> = vec![("has_warning", self.has_warning.into())];
        r.extend(self.flags.iter().map(|&(name, set)| (name, set.into())));
        r
    }
} // }}}

// RatedInfo (QPIRI) {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RatedInfo {
    // tokens 0..=6 are not decoded
    pub rated_battery_voltage: f64,
    pub battery_recharge_voltage: f64,
    pub battery_under_voltage: f64,
    pub battery_bulk_voltage: f64,
    pub battery_float_voltage: f64,
    // token 12 is not decoded
    pub max_ac_charging_current: i32,
    pub max_charging_current: i32,
}

impl RatedInfo {
    pub fn parse(response: &str) -> Option<Self> {
        let parts = tokens(Command::Qpiri, response, QPIRI_MIN_TOKENS)?;

        decode(Command::Qpiri, || {
            Ok(Self {
                rated_battery_voltage: field(&parts, 7)?,
                battery_recharge_voltage: field(&parts, 8)?,
                battery_under_voltage: field(&parts, 9)?,
                battery_bulk_voltage: field(&parts, 10)?,
                battery_float_voltage: field(&parts, 11)?,
                max_ac_charging_current: field(&parts, 13)?,
                max_charging_current: field(&parts, 14)?,
            })
        })
    }
}

impl Record for RatedInfo {
    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("rated_battery_voltage", self.rated_battery_voltage.into()),
            ("battery_recharge_voltage", self.battery_recharge_voltage.into()),
            ("battery_under_voltage", self.battery_under_voltage.into()),
            ("battery_bulk_voltage", self.battery_bulk_voltage.into()),
            ("battery_float_voltage", self.battery_float_voltage.into()),
            ("max_ac_charging_current", self.max_ac_charging_current.into()),
            ("max_charging_current", self.max_charging_current.into()),
        ]
    }
} // }}}

#[enum_dispatch(Record)]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Response {
    GeneralStatus,
    Pv2Status,
    WorkingMode,
    Warnings,
    RatedInfo,
}

impl Response {
    /// Decodes `raw` with the parser for `command`. None is the empty result.
    pub fn parse(command: Command, raw: &RawResponse) -> Option<Self> {
        let response = raw.as_str();
        match command {
            Command::Qpigs => GeneralStatus::parse(response).map(Self::from),
            Command::Qpigs2 => Pv2Status::parse(response).map(Self::from),
            Command::Qmodi => WorkingMode::parse(response).map(Self::from),
            Command::Qpiws => Warnings::parse(response).map(Self::from),
            Command::Qpiri => RatedInfo::parse(response).map(Self::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QPIGS: &str =
        "(230.1 50.0 230.0 50.0 0800 0750 030 360 52.3 010 090 045 012.3 180.5 52.1 000 B 00 00 00120";

    #[test]
    fn qpigs_sample() {
        let status = GeneralStatus::parse(QPIGS).unwrap();
        assert_eq!(status.grid_voltage, 230.1);
        assert_eq!(status.ac_output_apparent_power, 800);
        assert_eq!(status.output_load_percent, 30);
        assert_eq!(status.battery_voltage, 52.3);
        assert_eq!(status.pv_input_current, 12.3);
        assert_eq!(status.device_status, "B");
        assert_eq!(status.pv_input_power, 120);
    }

    #[test]
    fn qpigs_nineteen_tokens_defaults_pv_power() {
        let trimmed = QPIGS.rsplit_once(' ').unwrap().0;
        let status = GeneralStatus::parse(trimmed).unwrap();
        assert_eq!(status.pv_input_power, 0);
        assert_eq!(status.battery_discharge_current, 0);
        assert_eq!(status.device_status, "B");
    }

    #[test]
    fn qpigs_bad_number_discards_record() {
        let broken = QPIGS.replace("0750", "07x0");
        assert_eq!(GeneralStatus::parse(&broken), None);
    }

    #[test]
    fn requires_open_paren() {
        assert_eq!(GeneralStatus::parse(&QPIGS[1..]), None);
        assert_eq!(Pv2Status::parse("1.0 2.0 3"), None);
        assert_eq!(WorkingMode::parse("B"), None);
        assert_eq!(Warnings::parse(""), None);
        assert_eq!(RatedInfo::parse(""), None);
    }

    #[test]
    fn nak_is_a_frame() {
        assert_eq!(GeneralStatus::parse("(NAK"), None);
        assert_eq!(Pv2Status::parse("(NAK"), None);
        assert_eq!(RatedInfo::parse("(NAK"), None);

        assert_eq!(WorkingMode::parse("(NAK").unwrap().to_string(), "Unknown (N)");

        let warnings = Warnings::parse("(NAK").unwrap();
        assert!(warnings.flags.is_empty());
        assert!(!warnings.has_warning);
        assert_eq!(warnings.fields(), vec![("has_warning", Value::Bool(false))]);
    }

    #[test]
    fn qpigs2() {
        let pv2 = Pv2Status::parse("(120.5 3.2 0386").unwrap();
        assert_eq!(pv2.pv2_input_voltage, 120.5);
        assert_eq!(pv2.pv2_input_current, 3.2);
        assert_eq!(pv2.pv2_input_power, 386);

        assert_eq!(Pv2Status::parse("(120.5 3.2"), None);
        assert_eq!(Pv2Status::parse("(120.5 x 386"), None);
    }

    #[test]
    fn working_modes() {
        let cases = [
            ("(P", "Power On"),
            ("(S", "Standby"),
            ("(L", "Line"),
            ("(B", "Battery"),
            ("(F", "Fault"),
            ("(H", "Power Saving"),
            ("(Z", "Unknown (Z)"),
        ];
        for (raw, expected) in cases {
            assert_eq!(WorkingMode::parse(raw).unwrap().to_string(), expected);
        }
        assert_eq!(WorkingMode::parse("("), None);
    }

    #[test]
    fn qpiws_skips_reserved_bits() {
        let mut bits = vec!['0'; 32];
        bits[12] = '1';
        bits[14] = '1';
        bits[31] = '1';
        let raw = format!("({}", bits.into_iter().collect::<String>());

        let warnings = Warnings::parse(&raw).unwrap();
        assert_eq!(warnings.flags.len(), WARNING_FLAGS.len());
        assert!(!warnings.has_warning);
        assert!(warnings.active().is_empty());
    }

    #[test]
    fn qpiws_short_frame_emits_present_bits() {
        let warnings = Warnings::parse("(0001").unwrap();
        assert_eq!(warnings.flags.len(), 4);
        assert_eq!(warnings.is_set("bus_soft_fail"), Some(true));
        assert_eq!(warnings.is_set("line_fail"), None);
        assert!(warnings.has_warning);
    }

    #[test]
    fn qpiri() {
        let raw = "(230.0 34.7 230.0 50.0 34.7 8000 8000 48.0 46.0 42.0 56.4 54.0 2 30 060 0 1 2 1 01 0 0 54.0 0 1";
        let rated = RatedInfo::parse(raw).unwrap();
        assert_eq!(rated.rated_battery_voltage, 48.0);
        assert_eq!(rated.battery_recharge_voltage, 46.0);
        assert_eq!(rated.battery_under_voltage, 42.0);
        assert_eq!(rated.battery_bulk_voltage, 56.4);
        assert_eq!(rated.battery_float_voltage, 54.0);
        assert_eq!(rated.max_ac_charging_current, 30);
        assert_eq!(rated.max_charging_current, 60);

        assert_eq!(RatedInfo::parse("(230.0 34.7 230.0"), None);
    }

    #[test]
    fn raw_response_from_bytes() {
        let raw = RawResponse::from_bytes(b"  (B\xff\r");
        assert_eq!(raw.as_str(), "(B\u{fffd}");
        assert!(raw.is_frame());
        assert!(!raw.is_nak());
        assert!(RawResponse::from_bytes(b"").is_empty());
    }

    #[test]
    fn raw_response_drops_crc_after_leading_whitespace() {
        let mut bytes = b" (B".to_vec();
        bytes.extend_from_slice(&crate::pi30::command::checksum(b"(B"));
        bytes.push(b'\r');

        let raw = RawResponse::from_bytes(&bytes);
        assert_eq!(raw.as_str(), "(B");
        assert_eq!(WorkingMode::parse(raw.as_str()), Some(WorkingMode::Battery));
    }

    #[test]
    fn response_dispatches_fields() {
        let response = Response::parse(Command::Qmodi, &RawResponse::from("(L")).unwrap();
        assert_eq!(
            response.fields(),
            vec![("working_mode", Value::Text("Line".to_owned()))]
        );
    }
}
