//! Datengetriebene Kommandotabellen für TMCC1 und Legacy.
//! Die Tabellen sagen nur was ein Code bedeutet, die Anwendung (Hold, Toggle, Entprellung)
//! macht der Dekoder.

use crate::bridge_types::{AuxOption, Direction, LionelCommand, StartStop, UnitPosition};
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Bedeutung eines Tasten- / Aktionscodes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
  /// Direkt umsetzbares Kommando
  Command(LionelCommand),
  /// Horn, Hold Semantik
  HornPress,
  /// Quilling Horn mit Intensität 0-15, Hold Semantik
  QuillingPress(u8),
  /// Glocke, Toggle mit Entprellung
  BellPress,
  /// Richtungswechsel, Toggle mit Entprellung
  DirectionTogglePress,
  /// Verzögertes Abschalten, kann auch Teil eines Quick Stops sein
  ShutdownDelayed,
  /// Relative Geschwindigkeitsänderung, entprellt
  SpeedNudge(i8),
}

/// Legacy Multiword Parameter Index: Effekte (Rauch)
pub const MW_PARAM_EFFECTS: u8 = 0x0C;
/// Legacy Multiword Parameter Index: Beleuchtung
pub const MW_PARAM_LIGHTING: u8 = 0x0D;
/// Legacy Multiword Parameter Index: Lok einem Zug zuweisen
pub const MW_PARAM_TRAIN_ADDRESS: u8 = 0x42;
/// Legacy Multiword Parameter Index: Position im Zug
pub const MW_PARAM_TRAIN_UNIT: u8 = 0x43;
/// Parameter, bei denen ein einzelnes Wort noch zurückgehalten wird bis klar ist ob ein Multiword folgt
pub const MW_HOLDBACK_PARAMS: [u8; 4] = [
  MW_PARAM_EFFECTS,
  MW_PARAM_LIGHTING,
  MW_PARAM_TRAIN_ADDRESS,
  MW_PARAM_TRAIN_UNIT,
];

/// Gemeinsamer Teil TMCC1 Subkommando 00 und Legacy Aktionen 0x100-0x11E
fn insert_buttons(table: &mut HashMap<u8, ButtonAction>) {
  table.insert(0x00, cmd(LionelCommand::Direction(Direction::Forward)));
  table.insert(0x01, ButtonAction::DirectionTogglePress);
  table.insert(0x03, cmd(LionelCommand::Direction(Direction::Reverse)));
  table.insert(0x04, cmd(LionelCommand::Boost));
  table.insert(0x05, cmd(LionelCommand::FrontCoupler));
  table.insert(0x06, cmd(LionelCommand::RearCoupler));
  table.insert(0x07, cmd(LionelCommand::Brake));
  for n in 0..4u8 {
    table.insert(0x08 + n, cmd(LionelCommand::Aux1(AuxOption::from_bits(n))));
    table.insert(0x0C + n, cmd(LionelCommand::Aux2(AuxOption::from_bits(n))));
  }
  for n in 0..10u8 {
    table.insert(0x10 + n, cmd(LionelCommand::Numeric(n)));
  }
  table.insert(0x1C, ButtonAction::HornPress);
  table.insert(0x1D, ButtonAction::BellPress);
  table.insert(0x1E, cmd(LionelCommand::LetOff));
}

fn cmd(command: LionelCommand) -> ButtonAction {
  ButtonAction::Command(command)
}

/// Einheitenzuweisung aus 3 Bit: Bit 1-2 Position, Bit 0 rückwärts
fn unit_assignment(bits: u8) -> LionelCommand {
  LionelCommand::UnitAssignment {
    position: UnitPosition::from_bits(bits >> 1),
    reversed: (bits & 0x01) != 0,
  }
}

lazy_static! {
  /// TMCC1 Subkommando 00, Key ist das 5 Bit Datenfeld
  static ref TMCC1_ACTIONS: HashMap<u8, ButtonAction> = {
    let mut table = HashMap::new();
    insert_buttons(&mut table);
    table.insert(0x1F, cmd(LionelCommand::SpeedAbsolute(31)));
    table
  };

  /// TMCC1 Subkommando 01 (Consist, Momentum), Key ist das 5 Bit Datenfeld
  static ref TMCC1_EXTENDED: HashMap<u8, ButtonAction> = {
    let mut table = HashMap::new();
    for n in 0..8u8 {
      table.insert(n, cmd(unit_assignment(n)));
    }
    table.insert(0x08, cmd(LionelCommand::Momentum(0)));
    table.insert(0x09, cmd(LionelCommand::Momentum(4)));
    table.insert(0x0A, cmd(LionelCommand::Momentum(7)));
    table.insert(0x0C, cmd(LionelCommand::ClearConsist));
    table
  };

  /// Legacy 9 Bit Kommandos mit Bit 8 gesetzt, Key sind die unteren 8 Bit
  static ref LEGACY_ACTIONS: HashMap<u8, ButtonAction> = {
    let mut table = HashMap::new();
    insert_buttons(&mut table);
    //Horn 2
    table.insert(0x1F, ButtonAction::HornPress);
    for n in 0..8u8 {
      table.insert(0x20 + n, cmd(unit_assignment(n)));
    }
    table.insert(0x28, cmd(LionelCommand::Momentum(0)));
    table.insert(0x29, cmd(LionelCommand::Momentum(4)));
    table.insert(0x2A, cmd(LionelCommand::Momentum(7)));
    table.insert(0x2C, cmd(LionelCommand::ClearConsist));
    for n in 0..4u8 {
      table.insert(0x7C + n, cmd(LionelCommand::SmokeLevel(n)));
    }
    for n in 0..8u8 {
      table.insert(0xA0 + n, cmd(LionelCommand::DieselRunLevel(n)));
    }
    for n in 0..32u8 {
      table.insert(0xC0 + n, cmd(LionelCommand::EngineLabor(n)));
    }
    for n in 0..16u8 {
      table.insert(0xE0 + n, ButtonAction::QuillingPress(n));
    }
    table.insert(0xF4, cmd(LionelCommand::Bell(false)));
    table.insert(0xF5, cmd(LionelCommand::Bell(true)));
    table.insert(0xFB, cmd(LionelCommand::EngineStartStop(StartStop::ExtendedStart)));
    table.insert(0xFC, cmd(LionelCommand::EngineStartStop(StartStop::QuickStart)));
    table.insert(0xFD, ButtonAction::ShutdownDelayed);
    table.insert(0xFE, cmd(LionelCommand::EngineStartStop(StartStop::QuickStop)));
    table
  };
}

/// TMCC1 Paket Bedeutung
/// # Arguments
/// * sub_command - 2 Bit Subkommando
/// * data - 5 Bit Daten
pub fn tmcc1_action(sub_command: u8, data: u8) -> Option<ButtonAction> {
  match sub_command & 0x03 {
    0b00 => TMCC1_ACTIONS.get(&data).copied(),
    0b01 => TMCC1_EXTENDED.get(&data).copied(),
    //Relative Geschwindigkeit, 0x00..0x0A -> -5..+5
    0b10 => {
      if data <= 0x0A {
        Some(ButtonAction::SpeedNudge(data as i8 - 5))
      } else {
        None
      }
    }
    _ => Some(cmd(LionelCommand::SpeedAbsolute(data))),
  }
}

/// Legacy 9 Bit Kommando Bedeutung
/// # Arguments
/// * command - 9 Bit Kommando
pub fn legacy_action(command: u16) -> Option<ButtonAction> {
  let low = (command & 0xFF) as u8;
  if (command & 0x100) != 0 {
    return LEGACY_ACTIONS.get(&low).copied();
  }
  let command = match low {
    0..=199 => LionelCommand::SpeedAbsolute(low),
    0xC8..=0xCF => LionelCommand::Momentum(low - 0xC8),
    0xE0..=0xE7 => LionelCommand::BrakeLevel(low - 0xE0),
    0xE8..=0xEF => LionelCommand::BoostLevel(low - 0xE8),
    0xF0..=0xF7 => LionelCommand::TrainBrake(low - 0xF0),
    0xF8 => LionelCommand::SetStall,
    0xFB => LionelCommand::StopImmediate,
    _ => return None,
  };
  Some(cmd(command))
}

/// Legacy Multiword Parameter
/// # Arguments
/// * param - Parameter Index aus Wort 1
/// * data - Daten aus Wort 2
pub fn legacy_multiword(param: u8, data: u8) -> Option<LionelCommand> {
  match param {
    MW_PARAM_EFFECTS if data <= 3 => Some(LionelCommand::SmokeLevel(data)),
    MW_PARAM_LIGHTING => Some(LionelCommand::Lighting(data)),
    MW_PARAM_TRAIN_ADDRESS => Some(LionelCommand::TrainAddress(data)),
    MW_PARAM_TRAIN_UNIT => Some(LionelCommand::TrainUnit {
      position: UnitPosition::from_bits(data),
      reversed: (data & 0x04) != 0,
    }),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tmcc1_action_test() {
    assert_eq!(
      tmcc1_action(0, 0x00),
      Some(cmd(LionelCommand::Direction(Direction::Forward)))
    );
    assert_eq!(
      tmcc1_action(0, 0x1F),
      Some(cmd(LionelCommand::SpeedAbsolute(31)))
    );
    assert_eq!(tmcc1_action(0, 0x1D), Some(ButtonAction::BellPress));
    assert_eq!(tmcc1_action(0, 0x1A), None);
    assert_eq!(tmcc1_action(2, 0x00), Some(ButtonAction::SpeedNudge(-5)));
    assert_eq!(tmcc1_action(2, 0x05), Some(ButtonAction::SpeedNudge(0)));
    assert_eq!(tmcc1_action(2, 0x0A), Some(ButtonAction::SpeedNudge(5)));
    assert_eq!(tmcc1_action(2, 0x0B), None);
    assert_eq!(
      tmcc1_action(3, 17),
      Some(cmd(LionelCommand::SpeedAbsolute(17)))
    );
    assert_eq!(
      tmcc1_action(1, 0x07),
      Some(cmd(LionelCommand::UnitAssignment {
        position: UnitPosition::Tail,
        reversed: true
      }))
    );
  }

  #[test]
  fn legacy_action_test() {
    assert_eq!(
      legacy_action(199),
      Some(cmd(LionelCommand::SpeedAbsolute(199)))
    );
    assert_eq!(legacy_action(0xFB), Some(cmd(LionelCommand::StopImmediate)));
    assert_eq!(legacy_action(0xFF), None);
    assert_eq!(
      legacy_action(0x100),
      Some(cmd(LionelCommand::Direction(Direction::Forward)))
    );
    assert_eq!(legacy_action(0x1EF), Some(ButtonAction::QuillingPress(15)));
    assert_eq!(legacy_action(0x1FD), Some(ButtonAction::ShutdownDelayed));
    assert_eq!(
      legacy_action(0x1FC),
      Some(cmd(LionelCommand::EngineStartStop(StartStop::QuickStart)))
    );
    assert_eq!(
      legacy_action(0x17E),
      Some(cmd(LionelCommand::SmokeLevel(2)))
    );
  }

  #[test]
  fn legacy_multiword_test() {
    assert_eq!(
      legacy_multiword(MW_PARAM_EFFECTS, 3),
      Some(LionelCommand::SmokeLevel(3))
    );
    assert_eq!(legacy_multiword(MW_PARAM_EFFECTS, 4), None);
    assert_eq!(
      legacy_multiword(MW_PARAM_TRAIN_UNIT, 0x06),
      Some(LionelCommand::TrainUnit {
        position: UnitPosition::Middle,
        reversed: true
      })
    );
    assert_eq!(legacy_multiword(0x55, 1), None);
  }
}
