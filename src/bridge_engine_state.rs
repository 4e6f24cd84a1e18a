//! Zustand pro Lionel Lok / Zug.
//! Wird beim ersten Zugriff erzeugt und während der Laufzeit nie gelöscht.

use crate::{
  bridge_types::{Direction, LionelProtocol, LionelTarget, StartStop},
  mth_wtiu_vocabulary::{VOLUME_MAX, WTIU_SPEED_MAX},
};
use std::collections::HashMap;

/// Höchste TMCC1 Fahrstufe
pub const TMCC1_SPEED_MAX: u8 = 31;
/// Höchste Legacy Fahrstufe
pub const LEGACY_SPEED_MAX: u8 = 199;
/// Lautstärke beim Start
pub const VOLUME_DEFAULT: u8 = 70;
/// Höchste Rauchstufe
pub const SMOKE_MAX: u8 = 3;

/// Lineare Umrechnung mit Rundung
fn scale(value: u8, from_max: u8, to_max: u8) -> u8 {
  let value = value.min(from_max) as u32;
  ((value * to_max as u32 * 2 + from_max as u32) / (from_max as u32 * 2)) as u8
}

/// TMCC1 Fahrstufe 0-31 -> WTIU 0-120
pub fn tmcc1_to_wtiu(step: u8) -> u8 {
  scale(step, TMCC1_SPEED_MAX, WTIU_SPEED_MAX)
}

/// Legacy Fahrstufe 0-199 -> WTIU 0-120
pub fn legacy_to_wtiu(step: u8) -> u8 {
  scale(step, LEGACY_SPEED_MAX, WTIU_SPEED_MAX)
}

/// Unterstützung ProtoWhistle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
  Unknown,
  Supported,
  Unsupported,
}

#[derive(Clone, Debug)]
pub struct EngineState {
  /// None solange keine Richtung gesendet wurde
  pub direction: Option<Direction>,
  tmcc1_speed: u8,
  legacy_speed: u8,
  pub bell_on: bool,
  pub bell_changed_ms: Option<u64>,
  pub horn_held: bool,
  pub horn_last_ms: Option<u64>,
  pub smoke_level: u8,
  pub headlight_on: bool,
  pub protowhistle: Capability,
  pub protowhistle_enabled: bool,
  /// Zuletzt gesendete Tonhöhen Stufe 0-3
  pub quilling_pitch: Option<u8>,
  pub pfa_step: u8,
  pub pfa_last_ms: Option<u64>,
  pub volume: u8,
  /// Letztes Start/Stop Kommando (Entprellung doppelter Pakete)
  pub start_stop_last: Option<(StartStop, u64)>,
  /// Letzte extended Sequenz (Cooldown für Quick Kommandos)
  pub extended_last: Option<(StartStop, u64)>,
}

impl Default for EngineState {
  fn default() -> Self {
    EngineState {
      direction: None,
      tmcc1_speed: 0,
      legacy_speed: 0,
      bell_on: false,
      bell_changed_ms: None,
      horn_held: false,
      horn_last_ms: None,
      smoke_level: 0,
      headlight_on: true,
      protowhistle: Capability::Unknown,
      protowhistle_enabled: false,
      quilling_pitch: None,
      pfa_step: 0,
      pfa_last_ms: None,
      volume: VOLUME_DEFAULT,
      start_stop_last: None,
      extended_last: None,
    }
  }
}

impl EngineState {
  pub fn tmcc1_speed(&self) -> u8 {
    self.tmcc1_speed
  }

  pub fn legacy_speed(&self) -> u8 {
    self.legacy_speed
  }

  /// TMCC1 Fahrstufe setzen, Legacy Fahrstufe wird nachgeführt
  pub fn set_tmcc1_speed(&mut self, step: u8) {
    self.tmcc1_speed = step.min(TMCC1_SPEED_MAX);
    self.legacy_speed = scale(self.tmcc1_speed, TMCC1_SPEED_MAX, LEGACY_SPEED_MAX);
  }

  /// Legacy Fahrstufe setzen, TMCC1 Fahrstufe wird nachgeführt
  pub fn set_legacy_speed(&mut self, step: u8) {
    self.legacy_speed = step.min(LEGACY_SPEED_MAX);
    self.tmcc1_speed = scale(self.legacy_speed, LEGACY_SPEED_MAX, TMCC1_SPEED_MAX);
  }

  /// Fahrstufe im Bereich des Protokolles verändern
  /// # Arguments
  /// * protocol - Bestimmt Fahrstufenbereich
  /// * delta - Änderung in Fahrstufen
  pub fn nudge_speed(&mut self, protocol: LionelProtocol, delta: i16) {
    match protocol {
      LionelProtocol::Tmcc1 => {
        let step = (self.tmcc1_speed as i16 + delta).clamp(0, TMCC1_SPEED_MAX as i16);
        self.set_tmcc1_speed(step as u8);
      }
      LionelProtocol::Legacy => {
        let step = (self.legacy_speed as i16 + delta).clamp(0, LEGACY_SPEED_MAX as i16);
        self.set_legacy_speed(step as u8);
      }
    }
  }

  /// WTIU Geschwindigkeit aus dem Tracker des Protokolles
  pub fn wtiu_speed(&self, protocol: LionelProtocol) -> u8 {
    match protocol {
      LionelProtocol::Tmcc1 => tmcc1_to_wtiu(self.tmcc1_speed),
      LionelProtocol::Legacy => legacy_to_wtiu(self.legacy_speed),
    }
  }

  pub fn is_moving(&self) -> bool {
    self.tmcc1_speed > 0 || self.legacy_speed > 0
  }

  /// Lautstärke verändern, 0-100
  pub fn change_volume(&mut self, delta: i16) -> u8 {
    self.volume = (self.volume as i16 + delta).clamp(0, VOLUME_MAX as i16) as u8;
    self.volume
  }

  /// Rauch Zyklus aus -> tief -> mittel -> hoch
  pub fn change_smoke(&mut self, delta: i8) -> u8 {
    self.smoke_level = (self.smoke_level as i8 + delta).clamp(0, SMOKE_MAX as i8) as u8;
    self.smoke_level
  }

  /// Glocke Zustand ändern wenn Entprellzeit abgelaufen.
  /// Liefert false wenn nichts zu tun ist.
  /// # Arguments
  /// * on - Gewünschter Zustand
  /// * now - aktuelle Zeit ms
  /// * debounce - Mindestabstand zur letzten Änderung
  pub fn accept_bell(&mut self, on: bool, now: u64, debounce: u64) -> bool {
    if on == self.bell_on {
      return false;
    }
    if let Some(changed) = self.bell_changed_ms {
      if now.saturating_sub(changed) < debounce {
        return false;
      }
    }
    self.bell_on = on;
    self.bell_changed_ms = Some(now);
    true
  }
}

/// Alle Zustände, Zugriff nur über diese Methoden
#[derive(Default)]
pub struct EngineStates {
  states: HashMap<LionelTarget, EngineState>,
}

impl EngineStates {
  /// Zustand, wird beim ersten Zugriff erzeugt
  pub fn get_mut(&mut self, target: LionelTarget) -> &mut EngineState {
    self.states.entry(target).or_default()
  }

  pub fn get(&self, target: LionelTarget) -> Option<&EngineState> {
    self.states.get(&target)
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = (&LionelTarget, &mut EngineState)> {
    self.states.iter_mut()
  }
}
