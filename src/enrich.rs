//! Derived fields computed from decoded registers.
//!
//! [`enrich`] adds icons, lookup texts, the MAC address, the device name and the
//! clock and build-date strings. A derived field is only added when all of its
//! inputs were decoded, so a block that failed to read leaves its dependants out.
//! Codes missing from a lookup table never fail; they yield a fallback text and an
//! error log entry.

use crate::protocol::{DecodedReading, FieldValue};
use log::error;
use std::fmt;

fn no_text_defined(field: &str, code: impl fmt::Display) -> String {
    error!("{field} error. Undefined value:{code}");
    format!("No text defined for this value...{code}")
}

/// Charging stage reported in the MSB of register 4120.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Resting,
    Absorb,
    BulkMppt,
    Float,
    FloatMppt,
    Equalize,
    HyperVoc,
    EqualizeMppt,
    Unknown(u8),
}

impl From<u8> for ChargeState {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Resting,
            3 => Self::Absorb,
            4 => Self::BulkMppt,
            5 => Self::Float,
            6 => Self::FloatMppt,
            7 => Self::Equalize,
            10 => Self::HyperVoc,
            18 => Self::EqualizeMppt,
            other => Self::Unknown(other),
        }
    }
}

impl ChargeState {
    pub fn code(&self) -> u8 {
        match self {
            Self::Resting => 0,
            Self::Absorb => 3,
            Self::BulkMppt => 4,
            Self::Float => 5,
            Self::FloatMppt => 6,
            Self::Equalize => 7,
            Self::HyperVoc => 10,
            Self::EqualizeMppt => 18,
            Self::Unknown(code) => *code,
        }
    }

    pub fn text(&self) -> Option<&'static str> {
        Some(match self {
            Self::Resting => "Resting",
            Self::Absorb => "Absorb",
            Self::BulkMppt => "Bulk MPPT",
            Self::Float => "Float",
            Self::FloatMppt => "Float MPPT",
            Self::Equalize => "Equalize",
            Self::HyperVoc => "HyperVOC",
            Self::EqualizeMppt => "Equalize MPPT",
            Self::Unknown(_) => return None,
        })
    }

    /// Absorb and bulk count as charging.
    pub fn is_charging(&self) -> bool {
        matches!(self.code(), 3 | 4)
    }

    /// Icon by code range, unknown codes included.
    pub fn icon(&self) -> &'static str {
        match self.code() {
            3 | 4 => "mdi:battery-charging",
            5 | 6 => "mdi:format-float-center",
            code if code >= 7 => "mdi:approximately-equal",
            _ => "mdi:music-rest-whole",
        }
    }
}

/// Function assigned to an AUX output, from the low 6 bits of its register byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxFunction {
    DiversionHighPwm,
    DiversionLowPwm,
    WasteNotHigh,
    WasteNotLow,
    ToggleTest,
    PvVoltageOnHigh,
    PvVoltageOnLow,
    WindClipperControl,
    NiteLightHigh,
    DayLightHigh,
    FloatHighOutput,
    FloatLowOutput,
    ActiveHighTurnOff,
    ActiveLowTurnOff,
    ActiveHighFloat,
    WhizbangJunior,
    Reserved(u8),
    Unknown(u8),
}

impl AuxFunction {
    pub const MASK: u8 = 0x3f;

    /// Decodes a raw register byte; the top two bits are flags.
    pub fn from_raw(raw: u8) -> Self {
        match raw & Self::MASK {
            0 => Self::DiversionHighPwm,
            1 => Self::DiversionLowPwm,
            2 => Self::WasteNotHigh,
            3 => Self::WasteNotLow,
            code @ (4 | 5 | 9) => Self::Reserved(code),
            6 => Self::ToggleTest,
            7 => Self::PvVoltageOnHigh,
            8 => Self::PvVoltageOnLow,
            10 => Self::WindClipperControl,
            11 => Self::NiteLightHigh,
            12 => Self::DayLightHigh,
            13 => Self::FloatHighOutput,
            14 => Self::FloatLowOutput,
            15 => Self::ActiveHighTurnOff,
            16 => Self::ActiveLowTurnOff,
            17 => Self::ActiveHighFloat,
            18 => Self::WhizbangJunior,
            other => Self::Unknown(other),
        }
    }

    pub fn text(&self) -> Option<&'static str> {
        Some(match self {
            Self::DiversionHighPwm => "DIVERSION HIGH PWM",
            Self::DiversionLowPwm => "DIVERSION LOW PWM",
            Self::WasteNotHigh => "WASTE NOT HIGH",
            Self::WasteNotLow => "WASTE NOT LOW",
            Self::Reserved(_) => "RESERVED",
            Self::ToggleTest => "TOGGLE TEST",
            Self::PvVoltageOnHigh => "PV V ON HIGH",
            Self::PvVoltageOnLow => "PV V ON LOW",
            Self::WindClipperControl => "WIND CLIPPER CONTROL",
            Self::NiteLightHigh => "NITE LIGHT HIGH",
            Self::DayLightHigh => "DAY LIGHT HIGH",
            Self::FloatHighOutput => "FLOAT HIGH OUTPUT",
            Self::FloatLowOutput => "FLOAT LOW OUTPUT",
            Self::ActiveHighTurnOff => "Active HIGH (input) turn off",
            Self::ActiveLowTurnOff => "Active LOW (input) turn off",
            Self::ActiveHighFloat => "Active HIGH (input) Float",
            Self::WhizbangJunior => "Whizbang Junior (WB Jr.)",
            Self::Unknown(_) => return None,
        })
    }
}

/// Maximum power point tracking mode from register 4164.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpptMode {
    PvUset,
    Dynamic,
    WindTrack,
    LegacyPAndO,
    Solar,
    Hydro,
    Reserved(u16),
    Unknown(u16),
}

impl From<u16> for MpptMode {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::PvUset,
            3 => Self::Dynamic,
            5 => Self::WindTrack,
            9 => Self::LegacyPAndO,
            11 => Self::Solar,
            13 => Self::Hydro,
            7 | 15 => Self::Reserved(code),
            other => Self::Unknown(other),
        }
    }
}

impl MpptMode {
    pub fn text(&self) -> Option<&'static str> {
        Some(match self {
            Self::PvUset => "PV_Uset",
            Self::Dynamic => "DYNAMIC",
            Self::WindTrack => "WIND TRACK",
            Self::LegacyPAndO => "Legacy P&O",
            Self::Solar => "SOLAR",
            Self::Hydro => "HYDRO",
            Self::Reserved(_) => "RESERVED",
            Self::Unknown(_) => return None,
        })
    }
}

/// Why the controller is resting, from register 4275.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestReason {
    Known(u16, &'static str),
    Unknown(u16),
}

impl From<u16> for RestReason {
    fn from(code: u16) -> Self {
        let text = match code {
            1 => "Anti-Click. Not enough power available (Wake Up)",
            2 => "Insane Ibatt Measurement (Wake Up)",
            3 => "Negative Current (load on PV input ?) (Wake Up)",
            4 => "PV Input Voltage lower than Battery V (Vreg state)",
            5 => "Too low of power out and Vbatt below set point for > 90 seconds",
            6 => "FET temperature too high (Cover is on maybe?)",
            7 => "Ground Fault Detected",
            8 => "Arc Fault Detected",
            9 => "Too much negative current while operating (backfeed from battery out of PV input)",
            10 => "Battery is less than 8.0 Volts",
            11 | 14 => "PV input is available but V is rising too slowly. Low Light or bad connection(Solar mode)",
            12 | 15 => "Voc has gone down from last Voc or low light. Re-check (Solar mode)",
            13 => "Voc has gone up from last Voc enough to be suspicious. Re-check (Solar mode)",
            16 => "Mppt MODE is OFF (Usually because user turned it off)",
            17 => "PV input is higher than operation range (too high for 150V Classic)",
            18 => "PV input is higher than operation range (too high for 200V Classic)",
            19 => "PV input is higher than operation range (too high for 250V or 250KS)",
            22 => "Average Battery Voltage is too high above set point",
            25 => "Battery Voltage too high of Overshoot (small battery or bad cable ?)",
            26 => "Mode changed while running OR Vabsorb raised more than 10.0 Volts at once OR Nominal Vbatt changed by modbus command AND MpptMode was ON when changed",
            27 => "bridge center == 1023 (R132 might have been stuffed) This turns MPPT Mode to OFF",
            28 => "NOT Resting but RELAY is not engaged for some reason",
            29 => "ON/OFF stays off because WIND GRAPH is illegal (current step is set for > 100 amps)",
            30 => "PkAmpsOverLimit… Software detected too high of PEAK output current",
            31 => "AD1CH.IbattMinus > 900 Peak negative battery current > 90.0 amps (Classic 250)",
            32 => "Aux 2 input commanded Classic off. for HI or LO (Aux2Function == 15 or 16)",
            33 => "OCP in a mode other than Solar or PV-Uset",
            34 => "AD1CH.IbattMinus > 900 Peak negative battery current > 90.0 amps (Classic 150, 200)",
            35 => "Battery voltage is less than Low Battery Disconnect (LBD) Typically Vbatt is less than 8.5 volts",
            104 => "104?=14?: PV input is available but V is rising too slowly. Low Light or bad connection(Solar mode)",
            111 => "Normal Power up boot.",
            other => return Self::Unknown(other),
        };
        Self::Known(code, text)
    }
}

impl fmt::Display for RestReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(_, text) => f.write_str(text),
            Self::Unknown(code) => write!(f, "Unknown code: {code}"),
        }
    }
}

/// Battery icon for a state of charge in percent, bucketed to tens.
pub fn soc_icon(soc: i64, charge_state: Option<ChargeState>) -> String {
    let charging = if charge_state.is_some_and(|state| state.is_charging()) {
        "charging-"
    } else {
        ""
    };
    let icon = format!("mdi:battery-{charging}{}0", soc / 10);
    if icon == "mdi:battery-100" {
        "mdi:battery".to_string()
    } else {
        icon
    }
}

/// Formats the controller clock from the packed CTIME0 and CTIME1 registers.
pub fn decode_ctime(ctime0: i64, ctime1: i64) -> String {
    let seconds = ctime0 & 0x3f;
    let minutes = (ctime0 & 0x3f00) >> 8;
    let hours = (ctime0 & 0x1f_0000) >> 16;
    let day = ctime1 & 0x1f;
    let month = (ctime1 & 0x0f00) >> 8;
    let year = (ctime1 & 0x0fff_0000) >> 16;
    format!("{year:04}-{month:02}-{day:02} {hours:02}:{minutes:02}:{seconds:02}")
}

/// Firmware build date such as `Tuesday, February 6, 2018`.
pub fn build_date(year: i64, month: i64, day: i64) -> String {
    let date = i32::try_from(year).ok().and_then(|year| {
        chrono::NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
    });
    match date {
        Some(date) => date.format("%A, %B %-d, %Y").to_string(),
        None => format!("{year:04}{month:02}{day:02}"),
    }
}

fn format_mac(octets: [i64; 6]) -> String {
    octets
        .iter()
        .map(|octet| format!("{:02X}", octet & 0xff))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_name(bytes: [i64; 8]) -> String {
    bytes
        .iter()
        .map(|byte| char::from((byte & 0xff) as u8))
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

fn ints<const N: usize>(reading: &DecodedReading, names: [&str; N]) -> Option<[i64; N]> {
    let mut values = [0; N];
    for (value, name) in values.iter_mut().zip(names) {
        *value = reading.int(name)?;
    }
    Some(values)
}

fn text(value: impl Into<String>) -> FieldValue {
    FieldValue::Text(value.into())
}

/// Adds all derived fields to a decoded reading.
pub fn enrich(mut reading: DecodedReading) -> DecodedReading {
    let charge_state = reading
        .int("ChargeState")
        .map(|code| ChargeState::from((code & 0xff) as u8));

    if let Some(state) = charge_state {
        reading.insert("ChargeStateIcon", text(state.icon()));
        let label = match state.text() {
            Some(label) => label.to_string(),
            None => no_text_defined("ChargeStateText", state.code()),
        };
        reading.insert("ChargeStateText", text(label));
    }

    if let Some(soc) = reading.int("SOC") {
        reading.insert("SOCicon", text(soc_icon(soc, charge_state)));
    }

    if let Some(code) = reading.int("ReasonForResting") {
        let reason = RestReason::from((code & 0xffff) as u16);
        if let RestReason::Unknown(code) = reason {
            error!("ReasonForRestingText Error index:{code}");
        }
        reading.insert("ReasonForRestingText", text(reason.to_string()));
    }

    for (field, label_field) in [
        ("Aux1Function", "Aux1FunctionText"),
        ("Aux2Function", "Aux2FunctionText"),
    ] {
        if let Some(raw) = reading.int(field) {
            let function = AuxFunction::from_raw((raw & 0xff) as u8);
            let label = match function.text() {
                Some(label) => label.to_string(),
                None => no_text_defined(label_field, raw),
            };
            reading.insert(label_field, text(label));
        }
    }

    if let Some(raw) = reading.int("Aux1Function") {
        let whizbang = AuxFunction::from_raw((raw & 0xff) as u8) == AuxFunction::WhizbangJunior;
        reading.insert("hasWhizbang", FieldValue::Bool(whizbang));
    }

    if let Some(code) = reading.int("MPPTMode") {
        let mode = MpptMode::from((code & 0xffff) as u16);
        let label = match mode.text() {
            Some(label) => label.to_string(),
            None => no_text_defined("MPPTModeText", code),
        };
        reading.insert("MPPTModeText", text(label));
    }

    if let Some(bits) = reading.int("InfoFlagsBits") {
        reading.insert("Aux1", FieldValue::Bool(bits & 0x4000 != 0));
        reading.insert("Aux2", FieldValue::Bool(bits & 0x8000 != 0));
    }

    if let Some(octets) = ints(
        &reading,
        ["mac_5", "mac_4", "mac_3", "mac_2", "mac_1", "mac_0"],
    ) {
        reading.insert("MAC", text(format_mac(octets)));
    }

    if let Some(bytes) = ints(
        &reading,
        [
            "Name1", "Name0", "Name3", "Name2", "Name5", "Name4", "Name7", "Name6",
        ],
    ) {
        reading.insert("Name", text(format_name(bytes)));
    }

    if let Some([ctime0, ctime1]) = ints(&reading, ["CTIME0", "CTIME1"]) {
        reading.insert("currentTime", text(decode_ctime(ctime0, ctime1)));
    }

    if let Some([year, month, day]) = ints(&reading, ["Year", "Month", "Day"]) {
        reading.insert("buildDate", text(build_date(year, month, day)));
    }

    if reading.int("Type") == Some(251) {
        reading.insert("Type", text("250 KS"));
    }

    reading
}
