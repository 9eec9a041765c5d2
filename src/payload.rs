//! JSON payloads published to the broker.
//!
//! Both payloads have a fixed set of keys in a fixed order. Fields whose source
//! register block could not be read serialize as `null`.

use crate::protocol::DecodedReading;
use serde::Serialize;

/// Full telemetry, published on every successful tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Readings {
    #[serde(rename = "currentTime")]
    pub current_time: Option<String>,
    pub bat_temperature: Option<f64>,
    pub net_amp_hours: Option<i64>,
    pub charge_state: Option<i64>,
    pub charge_state_icon: Option<String>,
    pub charge_state_text: Option<String>,
    pub info_flags_bits: Option<i64>,
    pub reason_for_resting: Option<i64>,
    pub reason_for_resting_text: Option<String>,
    pub negative_amp_hours: Option<i64>,
    pub bat_voltage: Option<f64>,
    #[serde(rename = "PVVoltage")]
    pub pv_voltage: Option<f64>,
    pub vbatt_reg_set_p_tmp_comp: Option<f64>,
    pub total_amp_hours: Option<i64>,
    pub whizbang_bat_current: Option<f64>,
    pub bat_current: Option<f64>,
    #[serde(rename = "PVCurrent")]
    pub pv_current: Option<f64>,
    pub connection_state: i64,
    pub energy_today: Option<f64>,
    pub equalize_time: Option<i64>,
    #[serde(rename = "SOC")]
    pub soc: Option<i64>,
    #[serde(rename = "SOCicon")]
    pub soc_icon: Option<String>,
    pub aux1: Option<bool>,
    pub aux2: Option<bool>,
    pub power: Option<f64>,
    #[serde(rename = "FETTemperature")]
    pub fet_temperature: Option<f64>,
    pub positive_amp_hours: Option<i64>,
    pub total_energy: Option<f64>,
    pub float_time_today_seconds: Option<i64>,
    pub remaining_amp_hours: Option<i64>,
    pub absorb_time: Option<i64>,
    pub shunt_temperature: Option<f64>,
    #[serde(rename = "PCBTemperature")]
    pub pcb_temperature: Option<f64>,
}

impl From<&DecodedReading> for Readings {
    fn from(reading: &DecodedReading) -> Self {
        let text = |name: &str| reading.text(name).map(str::to_string);
        Self {
            current_time: text("currentTime"),
            bat_temperature: reading.float("BatTemperature"),
            net_amp_hours: reading.int("WbJrAmpHourNet"),
            charge_state: reading.int("ChargeState"),
            charge_state_icon: text("ChargeStateIcon"),
            charge_state_text: text("ChargeStateText"),
            info_flags_bits: reading.int("InfoFlagsBits"),
            reason_for_resting: reading.int("ReasonForResting"),
            reason_for_resting_text: text("ReasonForRestingText"),
            negative_amp_hours: reading.int("WbJrAmpHourNegative"),
            bat_voltage: reading.float("BatVoltage"),
            pv_voltage: reading.float("PVVoltage"),
            vbatt_reg_set_p_tmp_comp: reading.float("VbattRegSetPTmpComp"),
            total_amp_hours: reading.int("TotalAmpHours"),
            whizbang_bat_current: reading.float("WhizbangBatCurrent"),
            bat_current: reading.float("BatCurrent"),
            pv_current: reading.float("PVCurrent"),
            connection_state: 0,
            energy_today: reading.float("EnergyToday"),
            equalize_time: reading.int("EqualizeTime"),
            soc: reading.int("SOC"),
            soc_icon: text("SOCicon"),
            aux1: reading.flag("Aux1"),
            aux2: reading.flag("Aux2"),
            power: reading.float("Power"),
            fet_temperature: reading.float("FETTemperature"),
            positive_amp_hours: reading.int("WbJrAmpHourPositive"),
            total_energy: reading.float("TotalEnergy"),
            float_time_today_seconds: reading.int("FloatTimeTodaySeconds"),
            remaining_amp_hours: reading.int("RemainingAmpHours"),
            absorb_time: reading.int("AbsorbTime"),
            shunt_temperature: reading.float("ShuntTemperature"),
            pcb_temperature: reading.float("PCBTemperature"),
        }
    }
}

/// Identity and configuration of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub app_version: Option<i64>,
    pub build_date: Option<String>,
    pub device_name: Option<String>,
    pub device_type: &'static str,
    pub ending_amps: Option<f64>,
    pub has_whizbang: Option<bool>,
    #[serde(rename = "lastVOC")]
    pub last_voc: Option<f64>,
    pub model: Option<String>,
    pub mppt_mode: Option<i64>,
    pub mppt_mode_text: Option<String>,
    pub net_version: Option<i64>,
    pub nominal_battery_voltage: Option<i64>,
    #[serde(rename = "unitID")]
    pub unit_id: Option<i64>,
    pub mac_address: Option<String>,
    #[serde(rename = "IP")]
    pub ip: Option<String>,
}

impl From<&DecodedReading> for Info {
    fn from(reading: &DecodedReading) -> Self {
        let text = |name: &str| reading.text(name).map(str::to_string);
        let model = reading
            .get("Type")
            .zip(reading.get("PCB"))
            .map(|(kind, pcb)| format!("Classic {kind}V (rev {pcb})"));
        Self {
            app_version: reading.int("app_rev"),
            build_date: text("buildDate"),
            device_name: text("Name"),
            device_type: "Classic",
            ending_amps: reading.float("endingAmps"),
            has_whizbang: reading.flag("hasWhizbang"),
            last_voc: reading.float("lastVOC"),
            model,
            mppt_mode: reading.int("MPPTMode"),
            mppt_mode_text: text("MPPTModeText"),
            net_version: reading.int("net_rev"),
            nominal_battery_voltage: reading.int("nominalBatteryVoltage"),
            unit_id: reading.int("unitID"),
            mac_address: text("MAC"),
            ip: text("IP"),
        }
    }
}

/// Compact JSON of the readings payload.
pub fn readings_json(reading: &DecodedReading) -> serde_json::Result<String> {
    serde_json::to_string(&Readings::from(reading))
}

/// Compact JSON of the info payload.
pub fn info_json(reading: &DecodedReading) -> serde_json::Result<String> {
    serde_json::to_string(&Info::from(reading))
}
