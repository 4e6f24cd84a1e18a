//! Paket Dekoder für den seriellen Lionel Datenstrom.
//! TMCC1 (0xFE + 2 Byte), Legacy (0xF8/0xF9 + 2 Byte, Multiword 3 Worte mit 0xFB Folgeworten)
//! und PDI Frames (0xD1 ... 0xDF), die auf der gleichen Leitung ankommen.
//!
//! Der Dekoder setzt auch die Tastensemantik um:
//! - Horn: Hold, erstes Paket -> Ein, 300ms ohne Paket -> Aus
//! - Glocke, Richtungswechsel: Toggle, 500ms seit dem letzten Paket entprellt
//! - Relative Geschwindigkeit: 300ms seit der letzten angenommenen Änderung

use crate::{
  bridge_config::Timing,
  bridge_types::{
    Decoded, LionelCommand, LionelEvent, LionelProtocol, LionelTarget, StartStop,
  },
  lionel_protocol_pdi::{PDI_EOP, PDI_SOP, PDI_STF},
  lionel_protocol_tables::{
    legacy_action, legacy_multiword, tmcc1_action, ButtonAction, MW_HOLDBACK_PARAMS,
  },
};
use log::{debug, warn};
use std::collections::HashMap;

/// TMCC1 Startbyte
const TMCC1_START: u8 = 0xFE;
/// Legacy Startbyte Lok
const LEGACY_ENGINE_START: u8 = 0xF8;
/// Legacy Startbyte Zug
const LEGACY_TRAIN_START: u8 = 0xF9;
/// Legacy Multiword Folgewort. Nie Paketstart!
const LEGACY_MW_CONTINUATION: u8 = 0xFB;
/// Maximale Länge eines PDI Frames, längere werden verworfen
const PDI_MAX_FRAME: usize = 512;
/// Nach dieser Zeit wird ein unvollständiger PDI Frame verworfen
const PDI_STALE_MS: u64 = 1000;
/// Lok die ohne jede Auswahl über Adresse 0 angesprochen wird
const DEFAULT_ENGINE: u8 = 1;
/// Höchste Lionel Loknummer, die als aktuelle Lok ausgewählt werden kann
const MAX_SELECTABLE_ENGINE: u8 = 99;

/// Ergebnis der Prüfung des Pufferanfanges
#[derive(Debug, PartialEq, Eq)]
enum Frame {
  //Noch nicht genügend Bytes
  Incomplete,
  //Einzelnes Legacy Wort
  Single,
  //Legacy Multiword (9 Bytes)
  Multi,
  //PDI Frame mit dieser Länge
  Pdi(usize),
  //Diese Anzahl Bytes verwerfen
  Discard(usize),
}

/// Gehaltenes Horn pro Lok / Zug
#[derive(Debug, Clone, Copy)]
struct HornHold {
  protocol: LionelProtocol,
  last_packet_ms: u64,
  //Quilling Intensität, None für normales Horn
  level: Option<u8>,
}

pub struct PacketDecoder {
  buffer: Vec<u8>,
  //Zeitpunkt, seit dem unvollständige Bytes im Puffer warten
  pending_since: Option<u64>,
  current_engine: u8,
  horns: HashMap<LionelTarget, HornHold>,
  //Letztes Paket Glocke / Richtungswechsel (Entprellung ab letztem Paket)
  bell_packets: HashMap<LionelTarget, u64>,
  toggle_packets: HashMap<LionelTarget, u64>,
  //Letzte angenommene relative Geschwindigkeit
  nudges: HashMap<LionelTarget, u64>,
  //Letzter Stop Immediate pro Lok / Zug
  stop_immediate: HashMap<LionelTarget, u64>,
  timing: Timing,
}

impl PacketDecoder {
  /// Neuer Dekoder
  /// # Arguments
  /// * timing - Entprell- und Timeoutzeiten
  pub fn new(timing: Timing) -> PacketDecoder {
    PacketDecoder {
      buffer: Vec::new(),
      pending_since: None,
      current_engine: DEFAULT_ENGINE,
      horns: HashMap::new(),
      bell_packets: HashMap::new(),
      toggle_packets: HashMap::new(),
      nudges: HashMap::new(),
      stop_immediate: HashMap::new(),
      timing,
    }
  }

  /// Aktuell ausgewählte Lionel Lok (für Pakete mit Adresse 0)
  pub fn current_engine(&self) -> u8 {
    self.current_engine
  }

  /// Aktuelle Lok setzen
  /// # Arguments
  /// * engine - Lionel Loknummer
  pub fn set_current_engine(&mut self, engine: u8) {
    self.current_engine = engine;
  }

  /// Neue Bytes von der seriellen Schnittstelle verarbeiten.
  /// Unvollständige Pakete bleiben im Puffer bis weitere Bytes kommen.
  /// # Arguments
  /// * bytes - Empfangene Bytes, beliebig fragmentiert
  /// * now - aktuelle Zeit ms
  pub fn feed(&mut self, bytes: &[u8], now: u64) -> Vec<Decoded> {
    self.buffer.extend_from_slice(bytes);
    let result = self.parse(now, false);
    self.pending_since = if self.buffer.is_empty() {
      None
    } else {
      Some(now)
    };
    result
  }

  /// Zeitabhängige Auswertung, periodisch aufrufen.
  /// - Horn Release nach horn_release ms ohne Paket
  /// - Zurückgehaltene Bytes nach multiword_holdback ms erzwungen auswerten oder verwerfen
  /// # Arguments
  /// * now - aktuelle Zeit ms
  pub fn poll_timeouts(&mut self, now: u64) -> Vec<Decoded> {
    let mut result = Vec::new();
    if let Some(since) = self.pending_since {
      let limit = if self.buffer.first() == Some(&PDI_SOP) {
        PDI_STALE_MS
      } else {
        self.timing.multiword_holdback
      };
      if now.saturating_sub(since) >= limit {
        result.append(&mut self.parse(now, true));
        if !self.buffer.is_empty() {
          debug!("Unvollständiges Paket verworfen: {:02X?}", self.buffer);
          self.buffer.clear();
        }
        self.pending_since = None;
      }
    }
    let released: Vec<LionelTarget> = self
      .horns
      .iter()
      .filter(|(_, hold)| now.saturating_sub(hold.last_packet_ms) >= self.timing.horn_release)
      .map(|(target, _)| *target)
      .collect();
    for target in released {
      if let Some(hold) = self.horns.remove(&target) {
        result.push(Decoded::Event(LionelEvent::new(
          hold.protocol,
          target,
          LionelCommand::Horn(false),
        )));
      }
    }
    result
  }

  /// Puffer auswerten
  /// # Arguments
  /// * now - aktuelle Zeit ms
  /// * force - Zurückgehaltene Einzelworte jetzt als Einzelwort auswerten
  fn parse(&mut self, now: u64, force: bool) -> Vec<Decoded> {
    let mut result = Vec::new();
    loop {
      //Alles vor einem gültigen Startbyte verwerfen
      match self.buffer.iter().position(|b| {
        matches!(
          *b,
          TMCC1_START | LEGACY_ENGINE_START | LEGACY_TRAIN_START | PDI_SOP
        )
      }) {
        Some(0) => {}
        Some(pos) => {
          debug!("Bytes ohne Startbyte verworfen: {:02X?}", &self.buffer[..pos]);
          self.buffer.drain(..pos);
        }
        None => {
          if !self.buffer.is_empty() {
            debug!("Bytes ohne Startbyte verworfen: {:02X?}", self.buffer);
            self.buffer.clear();
          }
          break;
        }
      }
      let frame = match self.buffer[0] {
        TMCC1_START => {
          if self.buffer.len() < 3 {
            Frame::Incomplete
          } else {
            Frame::Single
          }
        }
        PDI_SOP => self.pdi_frame(),
        _ => self.legacy_frame(force),
      };
      match frame {
        Frame::Incomplete => break,
        Frame::Discard(len) => {
          debug!("Ungültiges Paket verworfen: {:02X?}", &self.buffer[..len]);
          self.buffer.drain(..len);
        }
        Frame::Pdi(len) => {
          result.push(Decoded::Pdi(self.buffer.drain(..len).collect()));
        }
        Frame::Single => {
          let packet: Vec<u8> = self.buffer.drain(..3).collect();
          let event = if packet[0] == TMCC1_START {
            self.decode_tmcc1(packet[1], packet[2], now)
          } else {
            self.decode_legacy(packet[0], packet[1], packet[2], now)
          };
          if let Some(event) = event {
            debug!("Dekodiert: {}", event.to_string());
            result.push(Decoded::Event(event));
          }
        }
        Frame::Multi => {
          let packet: Vec<u8> = self.buffer.drain(..9).collect();
          if let Some(event) = self.decode_multiword(&packet) {
            debug!("Dekodiert Multiword: {}", event.to_string());
            result.push(Decoded::Event(event));
          }
        }
      }
    }
    result
  }

  /// Legacy Wort am Pufferanfang: Einzelwort oder Multiword?
  /// Multiword wenn Bit 8 gesetzt und 0xFB an Byte 3 und 6.
  fn legacy_frame(&self, force: bool) -> Frame {
    let len = self.buffer.len();
    if len < 3 {
      return Frame::Incomplete;
    }
    let bit8 = (self.buffer[1] & 0x01) != 0;
    if !bit8 {
      return Frame::Single;
    }
    if len == 3 {
      //Bei Parametern, die als Multiword kommen können, warten ob ein Folgewort kommt
      if !force && MW_HOLDBACK_PARAMS.contains(&self.buffer[2]) {
        return Frame::Incomplete;
      }
      return Frame::Single;
    }
    if self.buffer[3] != LEGACY_MW_CONTINUATION {
      return Frame::Single;
    }
    if len < 7 {
      return if force {
        Frame::Discard(len)
      } else {
        Frame::Incomplete
      };
    }
    if self.buffer[6] != LEGACY_MW_CONTINUATION {
      //Erstes Wort ohne gültiges Folgewort, das 0xFB wird anschliessend als Müll verworfen
      return Frame::Discard(3);
    }
    if len < 9 {
      return if force {
        Frame::Discard(len)
      } else {
        Frame::Incomplete
      };
    }
    Frame::Multi
  }

  /// PDI Frame am Pufferanfang suchen (EOP ohne vorangehendes Escape)
  fn pdi_frame(&self) -> Frame {
    let mut index = 1;
    while index < self.buffer.len() {
      match self.buffer[index] {
        PDI_STF => index += 2,
        PDI_EOP => return Frame::Pdi(index + 1),
        //Neuer Frame beginnt bevor der alte fertig ist
        PDI_SOP => return Frame::Discard(index),
        _ => index += 1,
      }
      if index >= PDI_MAX_FRAME {
        return Frame::Discard(index.min(self.buffer.len()));
      }
    }
    Frame::Incomplete
  }

  /// Lok Adresse 0 verwendet die aktuelle Lok, 1-99 wählt sie aus
  /// # Arguments
  /// * address - Adresse aus dem Paket
  fn engine_target(&mut self, address: u8) -> LionelTarget {
    if address == 0 {
      LionelTarget::Engine(self.current_engine)
    } else {
      if address <= MAX_SELECTABLE_ENGINE {
        self.current_engine = address;
      }
      LionelTarget::Engine(address)
    }
  }

  /// TMCC1: Bit 15-14 Klasse, Bit 13-7 Adresse, Bit 6-5 Subkommando, Bit 4-0 Daten
  fn decode_tmcc1(&mut self, byte1: u8, byte2: u8, now: u64) -> Option<LionelEvent> {
    let class = byte1 >> 6;
    let address = ((byte1 & 0x3F) << 1) | (byte2 >> 7);
    let sub_command = (byte2 >> 5) & 0x03;
    let data = byte2 & 0x1F;
    let target = match class {
      0b00 => self.engine_target(address),
      0b01 if address > 0 => LionelTarget::Train(address),
      //Weichen, Zubehör: nicht unterstützt
      _ => {
        debug!("TMCC1 Klasse {} ignoriert", class);
        return None;
      }
    };
    let action = tmcc1_action(sub_command, data)?;
    self.apply_action(LionelProtocol::Tmcc1, target, action, now)
  }

  /// Legacy Einzelwort: Bit 7-1 von Byte 1 Adresse, 9 Bit Kommando
  fn decode_legacy(&mut self, start: u8, byte1: u8, byte2: u8, now: u64) -> Option<LionelEvent> {
    let address = byte1 >> 1;
    let target = if start == LEGACY_ENGINE_START {
      self.engine_target(address)
    } else if address > 0 {
      LionelTarget::Train(address)
    } else {
      return None;
    };
    let command = (((byte1 & 0x01) as u16) << 8) | byte2 as u16;
    let action = legacy_action(command)?;
    self.apply_action(LionelProtocol::Legacy, target, action, now)
  }

  /// Legacy Multiword: F8/F9 <addr> <param>, FB <addr> <data>, FB <addr> <checksum>
  fn decode_multiword(&mut self, packet: &[u8]) -> Option<LionelEvent> {
    let param = packet[2];
    let data = packet[5];
    let checksum = !(packet[1]
      .wrapping_add(param)
      .wrapping_add(packet[4])
      .wrapping_add(data));
    if checksum != packet[8] {
      warn!(
        "Legacy Multiword Checksumme falsch: {:02X?}, erwartet {:02X}",
        packet, checksum
      );
      return None;
    }
    let address = packet[1] >> 1;
    let target = if packet[0] == LEGACY_ENGINE_START {
      self.engine_target(address)
    } else if address > 0 {
      LionelTarget::Train(address)
    } else {
      return None;
    };
    match legacy_multiword(param, data) {
      Some(command) => Some(LionelEvent::new(LionelProtocol::Legacy, target, command)),
      None => {
        debug!("Legacy Multiword Parameter {:02X} ignoriert", param);
        None
      }
    }
  }

  /// Tastensemantik anwenden
  fn apply_action(&mut self, protocol: LionelProtocol, target: LionelTarget, action: ButtonAction, now: u64) -> Option<LionelEvent> {
    let command = match action {
      ButtonAction::Command(command) => {
        if command == LionelCommand::StopImmediate {
          self.stop_immediate.insert(target, now);
        }
        command
      }
      ButtonAction::HornPress => self.horn_packet(protocol, target, None, now)?,
      ButtonAction::QuillingPress(level) => self.horn_packet(protocol, target, Some(level), now)?,
      ButtonAction::BellPress => {
        let last = self.bell_packets.insert(target, now);
        if !debounced(now, last, self.timing.bell_debounce) {
          return None;
        }
        LionelCommand::BellToggle
      }
      ButtonAction::DirectionTogglePress => {
        let last = self.toggle_packets.insert(target, now);
        if !debounced(now, last, self.timing.direction_debounce) {
          return None;
        }
        LionelCommand::DirectionToggle
      }
      ButtonAction::SpeedNudge(delta) => {
        if !debounced(now, self.nudges.get(&target).copied(), self.timing.speed_debounce) {
          return None;
        }
        self.nudges.insert(target, now);
        LionelCommand::SpeedRelative(delta)
      }
      ButtonAction::ShutdownDelayed => {
        //Quick Shutdown Taste sendet Stop Immediate gefolgt von verzögertem Abschalten
        match self.stop_immediate.get(&target) {
          Some(t) if now.saturating_sub(*t) < self.timing.quick_shutdown_window => {
            LionelCommand::EngineStartStop(StartStop::QuickStop)
          }
          _ => LionelCommand::EngineStartStop(StartStop::ExtendedStop),
        }
      }
    };
    Some(LionelEvent::new(protocol, target, command))
  }

  /// Horn Paket: Ein beim ersten Paket, bei Quilling auch bei geänderter Intensität
  fn horn_packet(&mut self, protocol: LionelProtocol, target: LionelTarget, level: Option<u8>, now: u64) -> Option<LionelCommand> {
    let previous = self.horns.insert(
      target,
      HornHold {
        protocol,
        last_packet_ms: now,
        level,
      },
    );
    match (previous, level) {
      (None, None) => Some(LionelCommand::Horn(true)),
      (None, Some(level)) => Some(LionelCommand::QuillingHorn(level)),
      (Some(hold), Some(level)) if hold.level != Some(level) => Some(LionelCommand::QuillingHorn(level)),
      _ => None,
    }
  }
}

/// Entprellung: Letztes Paket mindestens window ms her
fn debounced(now: u64, last: Option<u64>, window: u64) -> bool {
  match last {
    Some(t) => now.saturating_sub(t) >= window,
    None => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bridge_types::{Direction, UnitPosition};

  fn decoder() -> PacketDecoder {
    PacketDecoder::new(Timing::default())
  }

  fn events(decoded: Vec<Decoded>) -> Vec<LionelEvent> {
    decoded
      .into_iter()
      .filter_map(|d| match d {
        Decoded::Event(e) => Some(e),
        _ => None,
      })
      .collect()
  }

  /// TMCC1 Lok Paket
  fn tmcc1(address: u8, sub_command: u8, data: u8) -> [u8; 3] {
    let word: u16 = ((address as u16) << 7) | ((sub_command as u16) << 5) | data as u16;
    [0xFE, (word >> 8) as u8, word as u8]
  }

  /// Legacy Einzelwort Lok
  fn legacy(address: u8, command: u16) -> [u8; 3] {
    [0xF8, (address << 1) | ((command >> 8) as u8 & 0x01), command as u8]
  }

  /// Legacy Multiword mit korrekter Checksumme
  fn multiword(start: u8, address: u8, param: u8, data: u8) -> [u8; 9] {
    let a = (address << 1) | 0x01;
    let b = address << 1;
    let checksum = !(a.wrapping_add(param).wrapping_add(b).wrapping_add(data));
    [start, a, param, 0xFB, b, data, 0xFB, b, checksum]
  }

  #[test]
  fn tmcc1_forward_and_speed31_test() {
    let mut decoder = decoder();
    decoder.set_current_engine(5);
    let result = events(decoder.feed(&[0xFE, 0x00, 0x00], 0));
    assert_eq!(
      result,
      vec![LionelEvent::new(
        LionelProtocol::Tmcc1,
        LionelTarget::Engine(5),
        LionelCommand::Direction(Direction::Forward)
      )]
    );
    //Adresse 12 wählen, Daten 0x1F
    let result = events(decoder.feed(&tmcc1(12, 0, 0x1F), 10));
    assert_eq!(
      result[0].command,
      LionelCommand::SpeedAbsolute(31)
    );
    assert_eq!(result[0].target, LionelTarget::Engine(12));
    assert_eq!(decoder.current_engine(), 12);
    //Für alle Lok Adressen liefert Daten 0x00 vorwärts
    for address in 1..128u8 {
      let result = events(decoder.feed(&tmcc1(address, 0, 0x00), 100));
      assert_eq!(result.len(), 1);
      assert_eq!(result[0].command, LionelCommand::Direction(Direction::Forward));
      assert_eq!(result[0].target, LionelTarget::Engine(address));
    }
  }

  #[test]
  fn tmcc1_classes_test() {
    let mut decoder = decoder();
    //Zug Klasse 01
    let result = events(decoder.feed(&[0xFE, 0x41, 0x60 | 0x0A], 0));
    assert_eq!(
      result,
      vec![LionelEvent::new(
        LionelProtocol::Tmcc1,
        LionelTarget::Train(2),
        LionelCommand::SpeedAbsolute(10)
      )]
    );
    //Weiche und Zubehör werden verworfen
    assert!(decoder.feed(&[0xFE, 0x80, 0x00], 0).is_empty());
    assert!(decoder.feed(&[0xFE, 0xC0, 0x00], 0).is_empty());
  }

  #[test]
  fn fragmentation_and_garbage_test() {
    let mut decoder = decoder();
    //Müll vor dem Startbyte, Paket in Stücken
    assert!(decoder.feed(&[0x12, 0x34, 0xFB], 0).is_empty());
    assert!(decoder.feed(&[0xFE], 1).is_empty());
    let packet = tmcc1(7, 3, 20);
    assert!(decoder.feed(&packet[1..2], 2).is_empty());
    let result = events(decoder.feed(&packet[2..3], 3));
    assert_eq!(
      result,
      vec![LionelEvent::new(
        LionelProtocol::Tmcc1,
        LionelTarget::Engine(7),
        LionelCommand::SpeedAbsolute(20)
      )]
    );
  }

  #[test]
  fn legacy_speed_test() {
    let mut decoder = decoder();
    for speed in 0..200u16 {
      let result = events(decoder.feed(&legacy(3, speed), speed as u64));
      assert_eq!(result[0].command, LionelCommand::SpeedAbsolute(speed as u8));
      assert_eq!(result[0].protocol, LionelProtocol::Legacy);
    }
  }

  #[test]
  fn tmcc1_bell_debounce_test() {
    let mut decoder = decoder();
    let bell = tmcc1(4, 0, 0x1D);
    let result = events(decoder.feed(&bell, 1000));
    assert_eq!(result[0].command, LionelCommand::BellToggle);
    //Taste gehalten, wiederholte Pakete innerhalb 500ms
    assert!(decoder.feed(&bell, 1100).is_empty());
    assert!(decoder.feed(&bell, 1300).is_empty());
    //Neuer Tastendruck nach Pause
    let result = events(decoder.feed(&bell, 1900));
    assert_eq!(result[0].command, LionelCommand::BellToggle);
  }

  #[test]
  fn direction_toggle_debounce_test() {
    let mut decoder = decoder();
    let toggle = tmcc1(4, 0, 0x01);
    assert_eq!(events(decoder.feed(&toggle, 0)).len(), 1);
    assert!(decoder.feed(&toggle, 200).is_empty());
    assert_eq!(events(decoder.feed(&toggle, 800)).len(), 1);
  }

  #[test]
  fn horn_hold_test() {
    let mut decoder = decoder();
    let horn = tmcc1(4, 0, 0x1C);
    let result = events(decoder.feed(&horn, 0));
    assert_eq!(result[0].command, LionelCommand::Horn(true));
    assert!(decoder.feed(&horn, 100).is_empty());
    assert!(decoder.feed(&horn, 200).is_empty());
    assert!(decoder.poll_timeouts(400).is_empty());
    let result = events(decoder.poll_timeouts(500));
    assert_eq!(
      result,
      vec![LionelEvent::new(
        LionelProtocol::Tmcc1,
        LionelTarget::Engine(4),
        LionelCommand::Horn(false)
      )]
    );
    //Nur einmal
    assert!(decoder.poll_timeouts(1000).is_empty());
  }

  #[test]
  fn quilling_horn_test() {
    let mut decoder = decoder();
    let result = events(decoder.feed(&legacy(8, 0x1E4), 0));
    assert_eq!(result[0].command, LionelCommand::QuillingHorn(4));
    //Gleiche Intensität: nichts
    assert!(decoder.feed(&legacy(8, 0x1E4), 100).is_empty());
    let result = events(decoder.feed(&legacy(8, 0x1EC), 200));
    assert_eq!(result[0].command, LionelCommand::QuillingHorn(12));
    let result = events(decoder.poll_timeouts(600));
    assert_eq!(result[0].command, LionelCommand::Horn(false));
  }

  #[test]
  fn relative_speed_debounce_test() {
    let mut decoder = decoder();
    let result = events(decoder.feed(&tmcc1(4, 2, 0x07), 0));
    assert_eq!(result[0].command, LionelCommand::SpeedRelative(2));
    assert!(decoder.feed(&tmcc1(4, 2, 0x07), 100).is_empty());
    let result = events(decoder.feed(&tmcc1(4, 2, 0x03), 300));
    assert_eq!(result[0].command, LionelCommand::SpeedRelative(-2));
  }

  #[test]
  fn multiword_smoke_test() {
    let mut decoder = decoder();
    let packet = multiword(0xF8, 6, 0x0C, 2);
    let result = events(decoder.feed(&packet, 0));
    assert_eq!(
      result,
      vec![LionelEvent::new(
        LionelProtocol::Legacy,
        LionelTarget::Engine(6),
        LionelCommand::SmokeLevel(2)
      )]
    );
  }

  #[test]
  fn multiword_fragmented_test() {
    let mut decoder = decoder();
    let packet = multiword(0xF8, 21, 0x42, 3);
    //Erstes Wort alleine wird zurückgehalten
    assert!(decoder.feed(&packet[..3], 0).is_empty());
    assert!(decoder.feed(&packet[3..5], 10).is_empty());
    assert!(decoder.poll_timeouts(50).is_empty());
    let result = events(decoder.feed(&packet[5..], 60));
    assert_eq!(result[0].command, LionelCommand::TrainAddress(3));
    assert_eq!(result[0].target, LionelTarget::Engine(21));
    let packet = multiword(0xF8, 21, 0x43, 0x03);
    let result = events(decoder.feed(&packet, 100));
    assert_eq!(
      result[0].command,
      LionelCommand::TrainUnit {
        position: UnitPosition::Tail,
        reversed: false
      }
    );
  }

  #[test]
  fn multiword_bad_checksum_test() {
    let mut decoder = decoder();
    let mut packet = multiword(0xF8, 6, 0x0C, 2);
    packet[8] ^= 0x01;
    assert!(decoder.feed(&packet, 0).is_empty());
    //Folgepaket wird normal dekodiert
    assert_eq!(events(decoder.feed(&legacy(6, 10), 1)).len(), 1);
  }

  #[test]
  fn holdback_timeout_test() {
    let mut decoder = decoder();
    //0x10D ist AUX2 Option 1, könnte aber auch Multiword Beleuchtung sein
    assert!(decoder.feed(&legacy(9, 0x10D), 0).is_empty());
    let result = events(decoder.poll_timeouts(150));
    assert_eq!(
      result[0].command,
      LionelCommand::Aux2(crate::bridge_types::AuxOption::Option1)
    );
    //Folgt ein normales Wort wird sofort entschieden
    let mut bytes = legacy(9, 0x10D).to_vec();
    bytes.extend_from_slice(&legacy(9, 0x100));
    let result = events(decoder.feed(&bytes, 200));
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn lone_fb_is_no_start_test() {
    let mut decoder = decoder();
    assert!(decoder.feed(&[0xFB, 0x02, 0x10], 0).is_empty());
    assert!(decoder.feed(&[0xFB], 1).is_empty());
    let result = events(decoder.feed(&legacy(1, 5), 2));
    assert_eq!(result.len(), 1);
  }

  #[test]
  fn quick_shutdown_test() {
    let mut decoder = decoder();
    //Stop Immediate gefolgt von verzögertem Abschalten -> Quick Stop
    decoder.feed(&legacy(3, 0xFB), 0);
    let result = events(decoder.feed(&legacy(3, 0x1FD), 100));
    assert_eq!(
      result[0].command,
      LionelCommand::EngineStartStop(StartStop::QuickStop)
    );
    //Alleine -> Extended Stop
    let result = events(decoder.feed(&legacy(3, 0x1FD), 5000));
    assert_eq!(
      result[0].command,
      LionelCommand::EngineStartStop(StartStop::ExtendedStop)
    );
  }

  #[test]
  fn pdi_frame_test() {
    let mut decoder = decoder();
    let frame = vec![0xD1, 0x21, 0x0D, 0x01, 0xDE, 0xD1, 0xDF];
    let mut bytes = frame.clone();
    bytes.extend_from_slice(&tmcc1(3, 0, 0));
    let result = decoder.feed(&bytes[..4], 0);
    assert!(result.is_empty());
    let result = decoder.feed(&bytes[4..], 1);
    assert_eq!(result.len(), 2);
    assert_eq!(result[0], Decoded::Pdi(frame));
  }
}
