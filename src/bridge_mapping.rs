//! Zuordnung Lionel Adresse -> MTH DCS Loknummer und deren Persistenz.
//! Reihenfolge: gelernt (persistiert) -> manuell aus [engine_map] -> Default Lionel + 1

use configparser::ini::Ini;
use log::{info, warn};
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Section der gelernten Lokzuordnungen im Mapping File
const SECTION_ENGINES: &str = "engines";
/// Section der zuletzt verwendeten Lashup IDs im Mapping File
const SECTION_LASHUPS: &str = "lashups";
/// Höchste MTH DCS Loknummer
pub const MTH_ENGINE_MAX: u16 = 99;

#[derive(Clone, Debug, Default)]
pub struct EngineMapping {
  discovered: HashMap<u8, u16>,
  manual: HashMap<u8, u16>,
  lionel_only: HashSet<u8>,
  //Auf der WTIU gemeldete MTH Loks, nur Information, None solange kein Roster gelesen wurde
  roster: Option<HashSet<u16>>,
}

pub type SharedMapping = Arc<RwLock<EngineMapping>>;

/// Lesezugriff, auch nach Panic eines anderen Threads
pub fn read_mapping(mapping: &SharedMapping) -> RwLockReadGuard<'_, EngineMapping> {
  mapping.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Schreibzugriff, auch nach Panic eines anderen Threads
pub fn write_mapping(mapping: &SharedMapping) -> RwLockWriteGuard<'_, EngineMapping> {
  mapping.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EngineMapping {
  /// # Arguments
  /// * manual - Manuelle Zuordnungen aus der Konfiguration
  /// * lionel_only - Lionel Adressen ohne MTH Gegenstück
  pub fn new(manual: HashMap<u8, u16>, lionel_only: HashSet<u8>) -> EngineMapping {
    EngineMapping {
      discovered: HashMap::new(),
      manual,
      lionel_only,
      roster: None,
    }
  }

  /// MTH Nummer ohne Berücksichtigung von Lionel-only
  fn resolve(&self, lionel: u8) -> u16 {
    self
      .discovered
      .get(&lionel)
      .or(self.manual.get(&lionel))
      .copied()
      .unwrap_or(lionel as u16 + 1)
  }

  /// Lok wird nur von der Lionel Base gesteuert
  /// # Arguments
  /// * lionel - Lionel Adresse
  pub fn is_lionel_only(&self, lionel: u8) -> bool {
    self.lionel_only.contains(&lionel)
  }

  /// MTH Loknummer, None für Lionel-only Loks
  /// # Arguments
  /// * lionel - Lionel Adresse
  pub fn mth_engine(&self, lionel: u8) -> Option<u16> {
    if self.is_lionel_only(lionel) {
      None
    } else {
      Some(self.resolve(lionel))
    }
  }

  /// Gelernte Zuordnung setzen
  pub fn learn(&mut self, lionel: u8, mth: u16) {
    if mth == 0 || mth > MTH_ENGINE_MAX {
      warn!("MTH Loknummer {} für Lionel {} ungültig", mth, lionel);
      return;
    }
    self.discovered.insert(lionel, mth);
  }

  pub fn discovered(&self) -> &HashMap<u8, u16> {
    &self.discovered
  }

  /// Auf der WTIU vorhandene MTH Loks, sortiert
  pub fn roster(&self) -> Vec<u16> {
    let mut engines: Vec<u16> = self.roster.iter().flatten().copied().collect();
    engines.sort();
    engines
  }

  /// Roster der WTIU übernehmen
  /// # Arguments
  /// * roster - Vorhandene MTH Loknummern
  pub fn set_roster(&mut self, roster: HashSet<u16>) {
    for (lionel, mth) in self.discovered.iter().chain(self.manual.iter()) {
      if !roster.contains(mth) {
        warn!("MTH Lok {} (Lionel {}) nicht im WTIU Roster", mth, lionel);
      }
    }
    self.roster = Some(roster);
    info!("WTIU Roster: {:?}", self.roster());
  }
}

/// Roster Antwort auf I0 als Hex Bitmap.
/// Annahme, nicht dokumentiert: Bit n gesetzt -> MTH Lok n vorhanden, die letzte Hex Ziffer
/// enthält Bit 0-3. Das Ergebnis wird nur für Abfragen und Logging verwendet.
/// # Arguments
/// * reply - Antworttext
pub fn parse_roster(reply: &str) -> Option<HashSet<u16>> {
  let bitmap = reply
    .split(|c: char| !c.is_ascii_hexdigit())
    .max_by_key(|run| run.len())?;
  if bitmap.len() < 2 {
    return None;
  }
  let mut roster = HashSet::new();
  for (index, c) in bitmap.chars().rev().enumerate() {
    let nibble = c.to_digit(16)? as u16;
    for bit in 0..4u16 {
      let engine = index as u16 * 4 + bit;
      if (nibble & (1 << bit)) != 0 && engine > 0 && engine <= MTH_ENGINE_MAX {
        roster.insert(engine);
      }
    }
  }
  Some(roster)
}

/// Persistierter Zustand
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedMapping {
  /// Lionel Adresse -> MTH Loknummer
  pub engines: HashMap<u8, u16>,
  /// Lionel Zug -> Lashup ID
  pub lashups: HashMap<u8, u16>,
}

/// Laden / Speichern der Zuordnungen
pub trait MappingStore: Send {
  fn load_mapping(&self) -> Result<PersistedMapping, String>;
  fn save_mapping(&self, mapping: &PersistedMapping) -> Result<(), String>;
}

/// Zuordnungen in einer INI Datei
pub struct IniMappingStore {
  path: String,
}

impl IniMappingStore {
  pub fn new(path: &str) -> IniMappingStore {
    IniMappingStore {
      path: path.to_string(),
    }
  }
}

/// Section mit Zahl = Zahl Einträgen lesen, ungültige werden ignoriert
fn parse_number_section(values: Option<&HashMap<String, Option<String>>>, section: &str) -> HashMap<u8, u16> {
  let mut result = HashMap::new();
  if let Some(values) = values {
    for (key, value) in values {
      match (
        key.trim().parse::<u8>(),
        value.as_ref().and_then(|v| v.trim().parse::<u16>().ok()),
      ) {
        (Ok(key), Some(value)) => {
          result.insert(key, value);
        }
        _ => warn!("Ungültiger Eintrag [{}] {} ignoriert", section, key),
      }
    }
  }
  result
}

impl MappingStore for IniMappingStore {
  fn load_mapping(&self) -> Result<PersistedMapping, String> {
    let mut ini = Ini::new();
    let values = ini.load(&self.path)?;
    Ok(PersistedMapping {
      engines: parse_number_section(values.get(SECTION_ENGINES), SECTION_ENGINES),
      lashups: parse_number_section(values.get(SECTION_LASHUPS), SECTION_LASHUPS),
    })
  }

  fn save_mapping(&self, mapping: &PersistedMapping) -> Result<(), String> {
    let mut ini = Ini::new();
    for (lionel, mth) in &mapping.engines {
      ini.set(SECTION_ENGINES, &lionel.to_string(), Some(mth.to_string()));
    }
    for (train, lashup) in &mapping.lashups {
      ini.set(SECTION_LASHUPS, &train.to_string(), Some(lashup.to_string()));
    }
    ini
      .write(&self.path)
      .map_err(|e| format!("Mapping File {} kann nicht geschrieben werden: {}", self.path, e))
  }
}

/// Speicher nur im RAM
#[cfg(test)]
#[derive(Default)]
pub struct MemoryMappingStore {
  mapping: std::sync::Mutex<PersistedMapping>,
}

#[cfg(test)]
impl MemoryMappingStore {
  pub fn new(mapping: PersistedMapping) -> MemoryMappingStore {
    MemoryMappingStore {
      mapping: std::sync::Mutex::new(mapping),
    }
  }
}

#[cfg(test)]
impl MappingStore for MemoryMappingStore {
  fn load_mapping(&self) -> Result<PersistedMapping, String> {
    self
      .mapping
      .lock()
      .map(|m| m.clone())
      .map_err(|_| "Mapping Lock".to_string())
  }
  fn save_mapping(&self, mapping: &PersistedMapping) -> Result<(), String> {
    let mut stored = self.mapping.lock().map_err(|_| "Mapping Lock".to_string())?;
    *stored = mapping.clone();
    Ok(())
  }
}
