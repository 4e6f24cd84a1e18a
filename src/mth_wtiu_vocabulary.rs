//! WTIU Kommando Vokabular.
//! Alle ausgehenden Kommandostrings kommen aus dieser Tabelle, einmal beim Start aus Defaults
//! und den Overrides aus [wtiu_commands] der Konfiguration erzeugt.

use crate::bridge_types::{Direction, StartStop};
use log::warn;
use std::collections::HashMap;

/// Maximale Lautstärke
pub const VOLUME_MAX: u8 = 100;
/// Maximale WTIU Geschwindigkeit
pub const WTIU_SPEED_MAX: u8 = 120;

/// Kommandonamen und Defaults
const DEFAULTS: [(&str, &str); 28] = [
  ("forward", "d0"),
  ("reverse", "d1"),
  ("horn_on", "w2"),
  ("horn_off", "bFFFD"),
  ("bell_on", "w4"),
  ("bell_off", "bFFFB"),
  ("front_coupler", "c0"),
  ("rear_coupler", "c1"),
  ("quick_start", "u4"),
  ("quick_stop", "u5"),
  ("extended_start", "u6"),
  ("extended_stop", "u7"),
  ("smoke_off", "abE"),
  ("smoke_low", "ab11"),
  ("smoke_med", "ab12"),
  ("smoke_high", "ab13"),
  ("smoke_on", "abF"),
  ("headlight_on", "ab1"),
  ("headlight_off", "ab0"),
  ("protowhistle_on", "ab1B"),
  ("pitch_1", "ab1C"),
  ("pitch_2", "ab1D"),
  ("pitch_3", "ab1E"),
  ("pitch_4", "ab1F"),
  ("pfa_start", "ab8"),
  ("pfa_advance", "ab9"),
  ("lashup_remove", "ul"),
  ("feature_reset", "ab5"),
];

#[derive(Clone, Debug)]
pub struct WtiuVocabulary {
  commands: HashMap<String, String>,
}

impl Default for WtiuVocabulary {
  fn default() -> Self {
    WtiuVocabulary {
      commands: DEFAULTS
        .iter()
        .map(|(name, cmd)| (name.to_string(), cmd.to_string()))
        .collect(),
    }
  }
}

impl WtiuVocabulary {
  /// Defaults mit Overrides aus der Konfiguration.
  /// Unbekannte Namen werden gemeldet und ignoriert.
  /// # Arguments
  /// * overrides - Name -> Kommando
  pub fn with_overrides(overrides: &HashMap<String, Option<String>>) -> WtiuVocabulary {
    let mut vocabulary = WtiuVocabulary::default();
    for (name, value) in overrides {
      match (vocabulary.commands.get_mut(name), value) {
        (Some(cmd), Some(value)) => *cmd = value.trim().to_string(),
        (Some(_), None) => warn!("WTIU Kommando {} ohne Wert ignoriert", name),
        (None, _) => warn!("Unbekanntes WTIU Kommando {} ignoriert", name),
      }
    }
    vocabulary
  }

  fn get(&self, name: &str) -> String {
    self.commands.get(name).cloned().unwrap_or_default()
  }

  pub fn direction(&self, direction: Direction) -> String {
    match direction {
      Direction::Forward => self.get("forward"),
      Direction::Reverse => self.get("reverse"),
    }
  }

  /// Geschwindigkeit 0-120
  pub fn speed(&self, speed: u8) -> String {
    format!("s{}", speed.min(WTIU_SPEED_MAX))
  }

  pub fn horn(&self, on: bool) -> String {
    self.get(if on { "horn_on" } else { "horn_off" })
  }

  pub fn bell(&self, on: bool) -> String {
    self.get(if on { "bell_on" } else { "bell_off" })
  }

  /// # Arguments
  /// * front - true: vordere Kupplung
  pub fn coupler(&self, front: bool) -> String {
    self.get(if front { "front_coupler" } else { "rear_coupler" })
  }

  pub fn start_stop(&self, variant: StartStop) -> String {
    self.get(match variant {
      StartStop::QuickStart => "quick_start",
      StartStop::QuickStop => "quick_stop",
      StartStop::ExtendedStart => "extended_start",
      StartStop::ExtendedStop => "extended_stop",
    })
  }

  /// Lautstärke 0-100, dreistellig
  pub fn volume(&self, volume: u8) -> String {
    format!("v0{:03}", volume.min(VOLUME_MAX))
  }

  /// Rauchstufe 0 (aus) bis 3 (hoch)
  pub fn smoke_level(&self, level: u8) -> String {
    self.get(match level {
      0 => "smoke_off",
      1 => "smoke_low",
      2 => "smoke_med",
      _ => "smoke_high",
    })
  }

  pub fn smoke_on(&self) -> String {
    self.get("smoke_on")
  }

  pub fn headlight(&self, on: bool) -> String {
    self.get(if on { "headlight_on" } else { "headlight_off" })
  }

  pub fn protowhistle_enable(&self) -> String {
    self.get("protowhistle_on")
  }

  /// ProtoWhistle Tonhöhe, Stufe 0-3
  pub fn protowhistle_pitch(&self, bucket: u8) -> String {
    self.get(match bucket {
      0 => "pitch_1",
      1 => "pitch_2",
      2 => "pitch_3",
      _ => "pitch_4",
    })
  }

  pub fn pfa_start(&self) -> String {
    self.get("pfa_start")
  }

  pub fn pfa_advance(&self) -> String {
    self.get("pfa_advance")
  }

  pub fn lashup_remove(&self) -> String {
    self.get("lashup_remove")
  }

  pub fn feature_reset(&self) -> String {
    self.get("feature_reset")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_test() {
    let vocabulary = WtiuVocabulary::default();
    assert_eq!(vocabulary.direction(Direction::Forward), "d0");
    assert_eq!(vocabulary.direction(Direction::Reverse), "d1");
    assert_eq!(vocabulary.speed(57), "s57");
    assert_eq!(vocabulary.speed(200), "s120");
    assert_eq!(vocabulary.volume(5), "v0005");
    assert_eq!(vocabulary.volume(100), "v0100");
    assert_eq!(vocabulary.bell(true), "w4");
    assert_eq!(vocabulary.bell(false), "bFFFB");
    assert_eq!(vocabulary.start_stop(StartStop::ExtendedStop), "u7");
    assert_eq!(vocabulary.smoke_level(2), "ab12");
    assert_eq!(vocabulary.protowhistle_pitch(3), "ab1F");
    assert_eq!(vocabulary.feature_reset(), "ab5");
  }

  #[test]
  fn overrides_test() {
    let mut overrides = HashMap::new();
    overrides.insert("bell_on".to_string(), Some(" w5 ".to_string()));
    overrides.insert("unbekannt".to_string(), Some("x".to_string()));
    overrides.insert("bell_off".to_string(), None);
    let vocabulary = WtiuVocabulary::with_overrides(&overrides);
    assert_eq!(vocabulary.bell(true), "w5");
    assert_eq!(vocabulary.bell(false), "bFFFB");
  }
}
