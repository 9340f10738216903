use crate::prelude::*;
use crate::pi30::packet::WARNING_FLAGS;

use serde::Serialize;

// (key, name, unit, device_class, state_class, icon)
type Sensor = (
    &'static str,
    &'static str,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
);

const MEASUREMENT: Option<&str> = Some("measurement");

#[rustfmt::skip]
const SENSORS: &[Sensor] = &[
    ("ac_output_voltage",              "AC Output Voltage",          Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("ac_output_frequency",            "AC Output Frequency",        Some("Hz"), Some("frequency"),      MEASUREMENT, None),
    ("ac_output_apparent_power",       "AC Output Apparent Power",   Some("VA"), Some("apparent_power"), MEASUREMENT, None),
    ("ac_output_active_power",         "AC Output Active Power",     Some("W"),  Some("power"),          MEASUREMENT, None),
    ("output_load_percent",            "Load Percent",               Some("%"),  None,                   MEASUREMENT, Some("mdi:gauge")),
    ("grid_voltage",                   "Grid Voltage",               Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("grid_frequency",                 "Grid Frequency",             Some("Hz"), Some("frequency"),      MEASUREMENT, None),
    ("bus_voltage",                    "Bus Voltage",                Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("battery_voltage",                "Battery Voltage",            Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("battery_voltage_from_scc",       "Battery Voltage (SCC)",      Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("battery_charging_current",       "Battery Charging Current",   Some("A"),  Some("current"),        MEASUREMENT, None),
    ("battery_discharge_current",      "Battery Discharge Current",  Some("A"),  Some("current"),        MEASUREMENT, None),
    ("battery_capacity",               "Battery Capacity",           Some("%"),  Some("battery"),        MEASUREMENT, None),
    ("inverter_heat_sink_temperature", "Inverter Temperature",       Some("°C"), Some("temperature"),    MEASUREMENT, None),
    ("pv_input_voltage",               "PV Input Voltage",           Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("pv_input_current",               "PV Input Current",           Some("A"),  Some("current"),        MEASUREMENT, None),
    ("pv_input_power",                 "PV Input Power",             Some("W"),  Some("power"),          MEASUREMENT, None),
    ("pv2_input_voltage",              "PV2 Input Voltage",          Some("V"),  Some("voltage"),        MEASUREMENT, None),
    ("pv2_input_current",              "PV2 Input Current",          Some("A"),  Some("current"),        MEASUREMENT, None),
    ("pv2_input_power",                "PV2 Input Power",            Some("W"),  Some("power"),          MEASUREMENT, None),
    ("device_status",                  "Device Status",              None,       None,                   None,        Some("mdi:state-machine")),
    ("working_mode",                   "Working Mode",               None,       None,                   None,        Some("mdi:solar-power")),
    ("rated_battery_voltage",          "Rated Battery Voltage",      Some("V"),  Some("voltage"),        None,        None),
    ("battery_recharge_voltage",       "Battery Recharge Voltage",   Some("V"),  Some("voltage"),        None,        None),
    ("battery_under_voltage",          "Battery Under Voltage",      Some("V"),  Some("voltage"),        None,        None),
    ("battery_bulk_voltage",           "Battery Bulk Voltage",       Some("V"),  Some("voltage"),        None,        None),
    ("battery_float_voltage",          "Battery Float Voltage",      Some("V"),  Some("voltage"),        None,        None),
    ("max_ac_charging_current",        "Max AC Charging Current",    Some("A"),  Some("current"),        None,        None),
    ("max_charging_current",           "Max Charging Current",       Some("A"),  Some("current"),        None,        None),
];

#[derive(Debug, Serialize)]
struct Device {
    identifiers: [String; 1],
    name: String,
    model: &'static str,
    sw_version: &'static str,
}

#[derive(Debug, Serialize)]
struct Entity<'a> {
    name: String,
    unique_id: String,
    object_id: String,
    state_topic: String,
    value_template: String,
    availability_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'a str>,
    device: &'a Device,
}

/// Builds the retained discovery configs for one inverter. Topics are
/// absolute; they live under the discovery prefix, not the namespace.
pub struct Config {
    node: String,
    prefix: String,
    namespace: String,
    device: Device,
}

impl Config {
    pub fn new(inverter: &config::Inverter, mqtt: &config::Mqtt) -> Self {
        Self {
            node: inverter.name().to_owned(),
            prefix: mqtt.homeassistant().prefix().to_owned(),
            namespace: mqtt.namespace().to_owned(),
            device: Device {
                identifiers: [format!("pi30_{}", inverter.name())],
                name: inverter.name().to_owned(),
                model: "PI30",
                sw_version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn all(&self) -> Result<Vec<mqtt::Message>> {
        let mut r = Vec::with_capacity(SENSORS.len() + WARNING_FLAGS.len() + 1);

        for &(key, name, unit, device_class, state_class, icon) in SENSORS {
            let entity = Entity {
                unit_of_measurement: unit,
                device_class,
                state_class,
                icon,
                ..self.entity(key, name, format!("{{{{ value_json.{} }}}}", key))
            };
            r.push(self.message("sensor", key, &entity)?);
        }

        let has_warning = Entity {
            icon: Some("mdi:alert-circle"),
            device_class: Some("problem"),
            ..self.binary_entity("has_warning", "Has Warning".to_owned())
        };
        r.push(self.message("binary_sensor", "has_warning", &has_warning)?);

        for &(_, key) in WARNING_FLAGS.iter() {
            let entity = Entity {
                device_class: Some("problem"),
                ..self.binary_entity(key, title_case(key))
            };
            r.push(self.message("binary_sensor", key, &entity)?);
        }

        Ok(r)
    }

    fn entity<'a>(&'a self, key: &str, name: &str, value_template: String) -> Entity<'a> {
        Entity {
            name: name.to_owned(),
            unique_id: format!("{}_{}", self.node, key),
            object_id: format!("{}_{}", self.node, key),
            state_topic: format!("{}/state", self.namespace),
            value_template,
            availability_topic: format!("{}/LWT", self.namespace),
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
            icon: None,
            payload_on: None,
            payload_off: None,
            device: &self.device,
        }
    }

    fn binary_entity<'a>(&'a self, key: &str, name: String) -> Entity<'a> {
        let template = format!("{{{{ 'ON' if value_json.{} else 'OFF' }}}}", key);
        Entity {
            payload_on: Some("ON"),
            payload_off: Some("OFF"),
            ..self.entity(key, &name, template)
        }
    }

    fn message(&self, component: &str, key: &str, entity: &Entity) -> Result<mqtt::Message> {
        Ok(mqtt::Message {
            topic: format!("{}/{}/{}/{}/config", self.prefix, component, self.node, key),
            retain: true,
            payload: serde_json::to_string(entity)?,
        })
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
