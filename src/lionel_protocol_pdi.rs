//! Lionel PDI (Protocol Data Interface) Framing.
//! Frame: SOP(0xD1) + gestopfte Daten + Checksumme + EOP(0xDF).
//! Vor jedem 0xD1, 0xDE, 0xDF in den Daten wird ein 0xDE Escape eingefügt.

use crate::bridge_types::UnitPosition;
use thiserror::Error;

/// Start of Packet
pub const PDI_SOP: u8 = 0xD1;
/// Escape (Stuffing)
pub const PDI_STF: u8 = 0xDE;
/// End of Packet
pub const PDI_EOP: u8 = 0xDF;
/// Zugdaten der Base
pub const PDI_CMD_BASE_TRAIN: u8 = 0x21;
/// Lesen
pub const PDI_ACTION_READ: u8 = 0x01;

//Offsets in den Zugdaten (Payload nach command, target, action)
const CONSIST_FLAGS_OFFSET: usize = 0x6F;
const CONSIST_SLOTS_OFFSET: usize = 0x70;
const CONSIST_SLOTS: usize = 16;
//Leerer Consist Slot
const CONSIST_SLOT_EMPTY: u8 = 0xFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdiError {
  #[error("PDI Frame ohne SOP/EOP")]
  MissingDelimiter,
  #[error("PDI Frame mit Escape am Ende")]
  DanglingEscape,
  #[error("PDI Frame zu kurz: {0} Bytes")]
  TooShort(usize),
  #[error("PDI Checksumme falsch: Summe {0:#04X}")]
  Checksum(u8),
}

/// Schreiben von PDI Frames auf die Lionel Schnittstelle (gleiche serielle Leitung wie TMCC)
pub trait PdiWriter: Send + Sync {
  /// Frame senden, false wenn nicht möglich
  fn write_frame(&self, frame: &[u8]) -> bool;
}

/// Eine Lok in einem Lionel Zug laut Base
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsistSlot {
  pub tmcc_id: u8,
  pub position: UnitPosition,
  pub reversed: bool,
}

/// Consist Daten eines Zuges laut Base
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainConsist {
  pub train_id: u8,
  pub flags: u8,
  pub members: Vec<ConsistSlot>,
}

/// Escape für alle Bytes, die SOP, STF, EOP entsprechen
/// # Arguments
/// * data - Zu stopfende Bytes
pub fn stuff(data: &[u8]) -> Vec<u8> {
  let mut result = Vec::with_capacity(data.len() + 4);
  for b in data {
    if matches!(*b, PDI_SOP | PDI_STF | PDI_EOP) {
      result.push(PDI_STF);
    }
    result.push(*b);
  }
  result
}

/// Escapes entfernen
/// # Arguments
/// * data - Gestopfte Bytes ohne SOP/EOP
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, PdiError> {
  let mut result = Vec::with_capacity(data.len());
  let mut iter = data.iter();
  while let Some(b) = iter.next() {
    if *b == PDI_STF {
      result.push(*iter.next().ok_or(PdiError::DanglingEscape)?);
    } else {
      result.push(*b);
    }
  }
  Ok(result)
}

/// Summe mod 256
fn byte_sum(data: &[u8]) -> u8 {
  data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Eine PDI Meldung
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdiMessage {
  pub command: u8,
  pub target_id: u8,
  pub action: u8,
  pub payload: Vec<u8>,
}

impl PdiMessage {
  pub fn new(command: u8, target_id: u8, action: u8, payload: Vec<u8>) -> PdiMessage {
    PdiMessage {
      command,
      target_id,
      action,
      payload,
    }
  }

  /// Abfrage der Zugdaten (inkl. Consist) eines Lionel Zuges
  /// # Arguments
  /// * train_id - Lionel Zugnummer
  pub fn train_request(train_id: u8) -> PdiMessage {
    PdiMessage::new(PDI_CMD_BASE_TRAIN, train_id, PDI_ACTION_READ, vec![])
  }

  /// Kompletter Frame zum Senden.
  /// Checksumme ist das Zweierkomplement der Summe aller gesendeten (gestopften) Bytes.
  pub fn to_frame(&self) -> Vec<u8> {
    let stuffed = stuff(&self.header_and_payload());
    let checksum = byte_sum(&stuffed).wrapping_neg();
    let mut frame = Vec::with_capacity(stuffed.len() + 4);
    frame.push(PDI_SOP);
    frame.extend_from_slice(&stuffed);
    frame.extend_from_slice(&stuff(&[checksum]));
    frame.push(PDI_EOP);
    frame
  }

  /// Frame auswerten
  /// # Arguments
  /// * frame - Kompletter Frame inkl. SOP und EOP
  pub fn from_frame(frame: &[u8]) -> Result<PdiMessage, PdiError> {
    if frame.len() < 2 || frame[0] != PDI_SOP || frame[frame.len() - 1] != PDI_EOP {
      return Err(PdiError::MissingDelimiter);
    }
    let body = unstuff(&frame[1..frame.len() - 1])?;
    //command, target, action, checksum
    if body.len() < 4 {
      return Err(PdiError::TooShort(body.len()));
    }
    let (data, checksum) = body.split_at(body.len() - 1);
    //Summe wie beim Senden über die gestopften Daten
    let sum = byte_sum(&stuff(data)).wrapping_add(checksum[0]);
    if sum != 0 {
      return Err(PdiError::Checksum(sum));
    }
    Ok(PdiMessage::new(data[0], data[1], data[2], data[3..].to_vec()))
  }

  fn header_and_payload(&self) -> Vec<u8> {
    let mut data = vec![self.command, self.target_id, self.action];
    data.extend_from_slice(&self.payload);
    data
  }

  /// Consist Daten aus einer Zugdaten Antwort.
  /// None wenn keine Zugdaten oder kein Consist enthalten ist.
  pub fn train_consist(&self) -> Option<TrainConsist> {
    if self.command != PDI_CMD_BASE_TRAIN || self.payload.len() <= CONSIST_FLAGS_OFFSET {
      return None;
    }
    let flags = self.payload[CONSIST_FLAGS_OFFSET];
    let mut members = Vec::new();
    for slot in 0..CONSIST_SLOTS {
      let offset = CONSIST_SLOTS_OFFSET + slot * 2;
      if offset + 1 >= self.payload.len() {
        break;
      }
      let tmcc_id = self.payload[offset];
      if tmcc_id == CONSIST_SLOT_EMPTY {
        continue;
      }
      let slot_flags = self.payload[offset + 1];
      members.push(ConsistSlot {
        tmcc_id,
        position: UnitPosition::from_bits(slot_flags),
        reversed: (slot_flags & 0x04) != 0,
      });
    }
    if members.is_empty() {
      return None;
    }
    Some(TrainConsist {
      train_id: self.target_id,
      flags,
      members,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stuff_unstuff_test() {
    let payload = vec![0x01, 0x21, 0x10, 0x7F];
    assert_eq!(stuff(&payload), payload);
    assert_eq!(unstuff(&stuff(&payload)).unwrap(), payload);
    assert_eq!(
      stuff(&[0xD1, 0x05, 0xDF]),
      vec![0xDE, 0xD1, 0x05, 0xDE, 0xDF]
    );
    assert_eq!(
      unstuff(&[0xDE, 0xD1, 0x05, 0xDE, 0xDF]).unwrap(),
      vec![0xD1, 0x05, 0xDF]
    );
    assert_eq!(unstuff(&[0x05, 0xDE]), Err(PdiError::DanglingEscape));
  }

  #[test]
  fn train_request_frame_test() {
    let frame = PdiMessage::train_request(5).to_frame();
    //0x21 + 0x05 + 0x01 = 0x27 -> Checksumme 0xD9
    assert_eq!(frame, vec![0xD1, 0x21, 0x05, 0x01, 0xD9, 0xDF]);
    //Summe aller unstuffed Bytes zwischen SOP und EOP ist 0
    let sum = frame[1..frame.len() - 1]
      .iter()
      .fold(0u8, |s, b| s.wrapping_add(*b));
    assert_eq!(sum, 0);
  }

  #[test]
  fn frame_roundtrip_test() {
    let msg = PdiMessage::new(0x21, 0x0A, 0x02, vec![0x10, 0x20, 0x30]);
    assert_eq!(PdiMessage::from_frame(&msg.to_frame()).unwrap(), msg);
    //Checksumme muss gestopft werden: 0x21 + 0x0D + 0x01 = 0x2F -> 0xD1
    let msg = PdiMessage::train_request(0x0D);
    let frame = msg.to_frame();
    assert_eq!(frame, vec![0xD1, 0x21, 0x0D, 0x01, 0xDE, 0xD1, 0xDF]);
    assert_eq!(PdiMessage::from_frame(&frame).unwrap(), msg);
  }

  #[test]
  fn escaped_payload_checksum_test() {
    let msg = PdiMessage::new(0x21, 0x04, 0x01, vec![0xD1, 0xDE, 0xDF, 0x10]);
    let frame = msg.to_frame();
    //Checksumme über die gestopften Bytes: Summe 0x5E -> 0xA2
    assert_eq!(
      frame,
      vec![0xD1, 0x21, 0x04, 0x01, 0xDE, 0xD1, 0xDE, 0xDE, 0xDE, 0xDF, 0x10, 0xA2, 0xDF]
    );
    let sum = frame[1..frame.len() - 1]
      .iter()
      .fold(0u8, |s, b| s.wrapping_add(*b));
    assert_eq!(sum, 0);
    assert_eq!(PdiMessage::from_frame(&frame).unwrap(), msg);
    //Checksumme über die ungestopften Bytes (0x3C) wird abgewiesen
    let mut unstuffed_sum = frame.clone();
    let len = unstuffed_sum.len();
    unstuffed_sum[len - 2] = 0x3C;
    assert_eq!(
      PdiMessage::from_frame(&unstuffed_sum),
      Err(PdiError::Checksum(0x9A))
    );
  }

  #[test]
  fn frame_errors_test() {
    assert_eq!(
      PdiMessage::from_frame(&[0x21, 0x05, 0x01, 0xD9, 0xDF]),
      Err(PdiError::MissingDelimiter)
    );
    assert_eq!(
      PdiMessage::from_frame(&[0xD1, 0x21, 0xDF]),
      Err(PdiError::TooShort(1))
    );
    //Checksumme verfälscht
    assert_eq!(
      PdiMessage::from_frame(&[0xD1, 0x21, 0x05, 0x01, 0xD8, 0xDF]),
      Err(PdiError::Checksum(0xFF))
    );
  }

  #[test]
  fn train_consist_test() {
    let mut payload = vec![0u8; 0x90];
    for slot in 0..16 {
      payload[0x70 + slot * 2] = 0xFF;
    }
    payload[0x6F] = 0x01;
    //Kopf Lok 12 vorwärts, Schluss Lok 15 rückwärts
    payload[0x70] = 12;
    payload[0x71] = 0x01;
    payload[0x72] = 15;
    payload[0x73] = 0x07;
    let msg = PdiMessage::new(PDI_CMD_BASE_TRAIN, 3, PDI_ACTION_READ, payload);
    let consist = msg.train_consist().unwrap();
    assert_eq!(consist.train_id, 3);
    assert_eq!(consist.flags, 0x01);
    assert_eq!(
      consist.members,
      vec![
        ConsistSlot {
          tmcc_id: 12,
          position: UnitPosition::Head,
          reversed: false
        },
        ConsistSlot {
          tmcc_id: 15,
          position: UnitPosition::Tail,
          reversed: true
        }
      ]
    );
    //Kurze Antwort ohne Consist Daten
    let msg = PdiMessage::new(PDI_CMD_BASE_TRAIN, 3, PDI_ACTION_READ, vec![0x00; 10]);
    assert_eq!(msg.train_consist(), None);
  }
}
