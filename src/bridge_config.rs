//! Konfiguration aus dem Configfile (INI).
//! Sections: [lionel], [wtiu], [bridge], [engine_map], [timing], [wtiu_commands]

use crate::mth_wtiu_session::WTIU_DEFAULT_PORT;
use log::warn;
use splitty::split_unquoted_char;
use std::{
  collections::{HashMap, HashSet},
  str::FromStr,
  time::Duration,
};

/// Werte einer Section
pub type ConfigSection = HashMap<String, Option<String>>;
/// Alle Sections
pub type ConfigValues = HashMap<String, ConfigSection>;

/// Default Baudrate Lionel SER2 / LCS
const LIONEL_DEFAULT_BAUD: u32 = 9600;
/// Default Mapping File
const DEFAULT_MAPPING_FILE: &str = "/var/lib/lmbridge.map";

/// Entprell- und Timeoutzeiten in ms
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
  /// Glocke einzelne Lok
  pub bell_debounce: u64,
  /// Glocke Zug
  pub bell_consist_debounce: u64,
  /// Horn aus nach dieser Zeit ohne Horn Paket
  pub horn_release: u64,
  /// Relative Geschwindigkeit (TMCC1 Drehknopf)
  pub speed_debounce: u64,
  pub direction_debounce: u64,
  /// Doppelte Start/Stop Pakete
  pub quick_debounce: u64,
  /// Keine Quick Kommandos während extended Start/Stop
  pub extended_cooldown: u64,
  pub pfa_timeout: u64,
  /// Zug Übernahme ohne neues Mitglied
  pub lashup_settle: u64,
  /// Wartezeit auf das nächste Wort eines Legacy Multiword
  pub multiword_holdback: u64,
  /// Shutdown delayed nach Stop Immediate -> Quick Stop
  pub quick_shutdown_window: u64,
}

impl Default for Timing {
  fn default() -> Self {
    Timing {
      bell_debounce: 500,
      bell_consist_debounce: 2000,
      horn_release: 300,
      speed_debounce: 300,
      direction_debounce: 500,
      quick_debounce: 2000,
      extended_cooldown: 20000,
      pfa_timeout: 60000,
      lashup_settle: 2000,
      multiword_holdback: 100,
      quick_shutdown_window: 500,
    }
  }
}

impl Timing {
  /// Overrides aus [timing] übernehmen
  /// # Arguments
  /// * section - Werte der Section [timing]
  fn with_overrides(section: &ConfigSection) -> Result<Timing, String> {
    let mut timing = Timing::default();
    let fields: [(&str, &mut u64); 11] = [
      ("bell_debounce", &mut timing.bell_debounce),
      ("bell_consist_debounce", &mut timing.bell_consist_debounce),
      ("horn_release", &mut timing.horn_release),
      ("speed_debounce", &mut timing.speed_debounce),
      ("direction_debounce", &mut timing.direction_debounce),
      ("quick_debounce", &mut timing.quick_debounce),
      ("extended_cooldown", &mut timing.extended_cooldown),
      ("pfa_timeout", &mut timing.pfa_timeout),
      ("lashup_settle", &mut timing.lashup_settle),
      ("multiword_holdback", &mut timing.multiword_holdback),
      ("quick_shutdown_window", &mut timing.quick_shutdown_window),
    ];
    for (name, field) in fields {
      *field = optional_number(section, "timing", name, *field)?;
    }
    for name in section.keys() {
      if !TIMING_KEYS.contains(&name.as_str()) {
        warn!("[timing] {} unbekannt, ignoriert", name);
      }
    }
    Ok(timing)
  }
}

const TIMING_KEYS: [&str; 11] = [
  "bell_debounce",
  "bell_consist_debounce",
  "horn_release",
  "speed_debounce",
  "direction_debounce",
  "quick_debounce",
  "extended_cooldown",
  "pfa_timeout",
  "lashup_settle",
  "multiword_holdback",
  "quick_shutdown_window",
];

/// Lionel Seite
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LionelConfig {
  /// Serielle Schnittstelle, z.B. /dev/ttyUSB0
  pub port: String,
  pub baud: u32,
}

/// MTH Seite
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WtiuConfig {
  /// Kandidaten in der Reihenfolge der Verwendung
  pub hosts: Vec<String>,
  pub port: u16,
  pub reply_timeout: Duration,
  pub roster_timeout: Duration,
  pub health_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
  pub lionel: LionelConfig,
  pub wtiu: WtiuConfig,
  pub mapping_file: String,
  pub lionel_only: HashSet<u8>,
  /// Manuelle Zuordnung Lionel -> MTH
  pub engine_map: HashMap<u8, u16>,
  pub timing: Timing,
  /// Overrides der WTIU Kommandos
  pub wtiu_commands: ConfigSection,
}

/// Pflichtwert lesen
fn required_value(section: &ConfigSection, section_name: &str, key: &str) -> Result<String, String> {
  section
    .get(key)
    .ok_or(format!("[{}] {} Parameter nicht vorhanden", section_name, key))?
    .clone()
    .ok_or(format!("[{}] {} Parameter ohne Wert", section_name, key))
}

/// Optionale Zahl mit Default
fn optional_number<T: FromStr>(section: &ConfigSection, section_name: &str, key: &str, default: T) -> Result<T, String> {
  match section.get(key) {
    Some(Some(value)) => value
      .trim()
      .parse::<T>()
      .ok()
      .ok_or(format!("[{}] {} muss eine Zahl sein", section_name, key)),
    Some(None) => Err(format!("[{}] {} Parameter ohne Wert", section_name, key)),
    None => Ok(default),
  }
}

/// Komma getrennte Liste, Leerzeichen werden entfernt
fn split_list(value: &str) -> Vec<String> {
  split_unquoted_char(value, ',')
    .unwrap_quotes(true)
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
    .collect()
}

impl BridgeConfig {
  /// Konfiguration aus den Werten des Configfiles
  /// # Arguments
  /// * values - Alle Sections des Configfiles
  pub fn from_values(values: &ConfigValues) -> Result<BridgeConfig, String> {
    let empty = ConfigSection::new();
    //[lionel]
    let lionel = values
      .get("lionel")
      .ok_or("Section [lionel] nicht vorhanden")?;
    let lionel = LionelConfig {
      port: required_value(lionel, "lionel", "port")?,
      baud: optional_number(lionel, "lionel", "baud", LIONEL_DEFAULT_BAUD)?,
    };
    //[wtiu]
    let wtiu = values.get("wtiu").ok_or("Section [wtiu] nicht vorhanden")?;
    let mut hosts = Vec::new();
    if let Some(Some(host)) = wtiu.get("host") {
      hosts.push(host.trim().to_string());
    }
    if let Some(Some(list)) = wtiu.get("hosts") {
      for host in split_list(list) {
        if !hosts.contains(&host) {
          hosts.push(host);
        }
      }
    }
    if hosts.is_empty() {
      Err("[wtiu] host oder hosts muss angegeben werden")?;
    }
    let wtiu = WtiuConfig {
      hosts,
      port: optional_number(wtiu, "wtiu", "port", WTIU_DEFAULT_PORT)?,
      reply_timeout: Duration::from_millis(optional_number(wtiu, "wtiu", "reply_timeout_ms", 2000)?),
      roster_timeout: Duration::from_millis(optional_number(wtiu, "wtiu", "roster_timeout_ms", 12000)?),
      health_interval: Duration::from_secs(optional_number(wtiu, "wtiu", "health_interval_s", 5)?),
    };
    //[bridge]
    let bridge = values.get("bridge").unwrap_or(&empty);
    let mapping_file = match bridge.get("mapping_file") {
      Some(Some(file)) => file.trim().to_string(),
      _ => DEFAULT_MAPPING_FILE.to_string(),
    };
    let mut lionel_only = HashSet::new();
    if let Some(Some(list)) = bridge.get("lionel_only") {
      for engine in split_list(list) {
        lionel_only.insert(
          engine
            .parse::<u8>()
            .ok()
            .ok_or(format!("[bridge] lionel_only {} muss eine Lok Adresse sein", engine))?,
        );
      }
    }
    //[engine_map]
    let mut engine_map = HashMap::new();
    if let Some(section) = values.get("engine_map") {
      for (lionel_engine, mth) in section {
        let lionel_engine = lionel_engine
          .trim()
          .parse::<u8>()
          .ok()
          .ok_or(format!("[engine_map] {} muss eine Lok Adresse sein", lionel_engine))?;
        let mth = mth
          .as_ref()
          .and_then(|m| m.trim().parse::<u16>().ok())
          .ok_or(format!("[engine_map] {} ohne gültige MTH Nummer", lionel_engine))?;
        engine_map.insert(lionel_engine, mth);
      }
    }
    let timing = Timing::with_overrides(values.get("timing").unwrap_or(&empty))?;
    let wtiu_commands = values.get("wtiu_commands").cloned().unwrap_or_default();
    Ok(BridgeConfig {
      lionel,
      wtiu,
      mapping_file,
      lionel_only,
      engine_map,
      timing,
      wtiu_commands,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use configparser::ini::Ini;

  fn values(text: &str) -> ConfigValues {
    let mut ini = Ini::new();
    ini.read(text.to_string()).unwrap()
  }

  #[test]
  fn minimal_config_test() {
    let config = BridgeConfig::from_values(&values(
      "[lionel]\nport = /dev/ttyUSB0\n[wtiu]\nhost = 192.168.1.50\n",
    ))
    .unwrap();
    assert_eq!(config.lionel.port, "/dev/ttyUSB0");
    assert_eq!(config.lionel.baud, 9600);
    assert_eq!(config.wtiu.hosts, vec!["192.168.1.50".to_string()]);
    assert_eq!(config.wtiu.port, 33069);
    assert_eq!(config.wtiu.reply_timeout, Duration::from_secs(2));
    assert_eq!(config.wtiu.roster_timeout, Duration::from_secs(12));
    assert_eq!(config.wtiu.health_interval, Duration::from_secs(5));
    assert_eq!(config.mapping_file, "/var/lib/lmbridge.map");
    assert_eq!(config.timing, Timing::default());
    assert!(config.engine_map.is_empty());
  }

  #[test]
  fn full_config_test() {
    let config = BridgeConfig::from_values(&values(
      "[lionel]\nport = /dev/ttyS1\nbaud = 115200\n\
       [wtiu]\nhost = wtiu1\nhosts = wtiu2, wtiu1 ,wtiu3\nport = 4000\n\
       [bridge]\nmapping_file = /tmp/x.map\nlionel_only = 4, 8\n\
       [engine_map]\n3 = 20\n\
       [timing]\nbell_debounce = 700\nlashup_settle = 3000\n\
       [wtiu_commands]\nhorn_on = w3\n",
    ))
    .unwrap();
    assert_eq!(config.lionel.baud, 115200);
    assert_eq!(config.wtiu.hosts, vec!["wtiu1", "wtiu2", "wtiu3"]);
    assert_eq!(config.wtiu.port, 4000);
    assert_eq!(config.mapping_file, "/tmp/x.map");
    assert_eq!(config.lionel_only, HashSet::from([4, 8]));
    assert_eq!(config.engine_map, HashMap::from([(3, 20)]));
    assert_eq!(config.timing.bell_debounce, 700);
    assert_eq!(config.timing.lashup_settle, 3000);
    assert_eq!(config.timing.horn_release, 300);
    assert_eq!(
      config.wtiu_commands.get("horn_on"),
      Some(&Some("w3".to_string()))
    );
  }

  #[test]
  fn config_errors_test() {
    assert_eq!(
      BridgeConfig::from_values(&values("[wtiu]\nhost = a\n")).unwrap_err(),
      "Section [lionel] nicht vorhanden"
    );
    assert_eq!(
      BridgeConfig::from_values(&values("[lionel]\nport = /dev/x\n[wtiu]\nport = 1\n")).unwrap_err(),
      "[wtiu] host oder hosts muss angegeben werden"
    );
    assert_eq!(
      BridgeConfig::from_values(&values(
        "[lionel]\nport = /dev/x\nbaud = schnell\n[wtiu]\nhost = a\n"
      ))
      .unwrap_err(),
      "[lionel] baud muss eine Zahl sein"
    );
    assert!(BridgeConfig::from_values(&values(
      "[lionel]\nport = /dev/x\n[wtiu]\nhost = a\n[engine_map]\n3 = x\n"
    ))
    .is_err());
  }
}
