//! globale Definitionen für alle Teile der Bridge (Lionel Seite und MTH Seite)

/// Lionel Protokoll, aus dem ein Kommando dekodiert wurde
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LionelProtocol {
  //3 Byte Pakete, 32 Fahrstufen
  Tmcc1,
  //TMCC2, 3 Byte Worte und 9 Byte Multiword, 200 Fahrstufen
  Legacy,
}

/// Adressierung eines Lionel Kommandos: einzelne Lok oder Zug (Consist)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LionelTarget {
  Engine(u8),
  Train(u8),
}
impl LionelTarget {
  /// Liefert die Lionel Adresse (Lok- oder Zugnummer)
  pub fn id(&self) -> u8 {
    match self {
      LionelTarget::Engine(id) | LionelTarget::Train(id) => *id,
    }
  }
}
impl ToString for LionelTarget {
  fn to_string(&self) -> String {
    match self {
      LionelTarget::Engine(id) => format!("Lok {}", id),
      LionelTarget::Train(id) => format!("Zug {}", id),
    }
  }
}

/// Fahrtrichtung
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  Forward,
  Reverse,
}
impl Direction {
  pub fn toggled(&self) -> Direction {
    match self {
      Direction::Forward => Direction::Reverse,
      Direction::Reverse => Direction::Forward,
    }
  }
}

/// Die vier Start- / Stopvarianten. Dürfen nie verwechselt werden.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StartStop {
  QuickStart,
  QuickStop,
  ExtendedStart,
  ExtendedStop,
}
impl StartStop {
  pub fn is_start(&self) -> bool {
    matches!(self, StartStop::QuickStart | StartStop::ExtendedStart)
  }
  pub fn is_extended(&self) -> bool {
    matches!(self, StartStop::ExtendedStart | StartStop::ExtendedStop)
  }
}

/// Position einer Lok in einem Zug
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitPosition {
  Single,
  Head,
  Middle,
  Tail,
}
impl UnitPosition {
  /// Aus Bit 0-1 eines Flag Bytes (PDI Consist Slot, TRAIN_UNIT Daten)
  pub fn from_bits(bits: u8) -> UnitPosition {
    match bits & 0x03 {
      0 => UnitPosition::Single,
      1 => UnitPosition::Head,
      2 => UnitPosition::Middle,
      _ => UnitPosition::Tail,
    }
  }
  /// Sortierreihenfolge Kopf -> Schluss
  pub fn order(&self) -> u8 {
    match self {
      UnitPosition::Single | UnitPosition::Head => 0,
      UnitPosition::Middle => 1,
      UnitPosition::Tail => 2,
    }
  }
}

/// AUX1 / AUX2 Tasten Varianten
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuxOption {
  Off,
  Option1,
  Option2,
  On,
}
impl AuxOption {
  pub fn from_bits(bits: u8) -> AuxOption {
    match bits & 0x03 {
      0 => AuxOption::Off,
      1 => AuxOption::Option1,
      2 => AuxOption::Option2,
      _ => AuxOption::On,
    }
  }
}

/// Dekodiertes Lionel Kommando
/// Geschwindigkeiten sind immer im Bereich des Protokolles, aus dem sie stammen (TMCC1 0-31, Legacy 0-199)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LionelCommand {
  Direction(Direction),
  DirectionToggle,
  SpeedAbsolute(u8),
  SpeedRelative(i8),
  Boost,
  Brake,
  BoostLevel(u8),
  BrakeLevel(u8),
  TrainBrake(u8),
  Momentum(u8),
  SetStall,
  StopImmediate,
  //true: Horn Ein, false: Horn losgelassen
  Horn(bool),
  //Quilling Horn Intensität 0-15
  QuillingHorn(u8),
  //Glocke Taste (entprellt), schaltet abwechselnd Ein / Aus
  BellToggle,
  //Glocke explizit Ein / Aus
  Bell(bool),
  LetOff,
  FrontCoupler,
  RearCoupler,
  Aux1(AuxOption),
  Aux2(AuxOption),
  Numeric(u8),
  //Direkte Rauchstufe 0-3
  SmokeLevel(u8),
  EngineStartStop(StartStop),
  DieselRunLevel(u8),
  EngineLabor(u8),
  Lighting(u8),
  //Consist Aufbau
  UnitAssignment { position: UnitPosition, reversed: bool },
  TrainAddress(u8),
  TrainUnit { position: UnitPosition, reversed: bool },
  ClearConsist,
}
impl LionelCommand {
  /// Kommandos, die nur den Consist Aufbau betreffen und nicht übersetzt werden
  pub fn is_consist_setup(&self) -> bool {
    matches!(
      self,
      LionelCommand::UnitAssignment { .. }
        | LionelCommand::TrainAddress(_)
        | LionelCommand::TrainUnit { .. }
    )
  }
}

/// Ein dekodiertes Lionel Kommando inkl. Adressierung.
/// Wird einmal erzeugt und genau einmal übersetzt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LionelEvent {
  pub protocol: LionelProtocol,
  pub target: LionelTarget,
  pub command: LionelCommand,
}
impl LionelEvent {
  pub fn new(protocol: LionelProtocol, target: LionelTarget, command: LionelCommand) -> LionelEvent {
    LionelEvent {
      protocol,
      target,
      command,
    }
  }
}
impl ToString for LionelEvent {
  fn to_string(&self) -> String {
    format!(
      "{:?} {} {:?}",
      self.protocol,
      self.target.to_string(),
      self.command
    )
  }
}

/// Ergebnis des Paket Dekoders: Lionel Kommando oder roher PDI Frame (gleiche serielle Leitung)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
  Event(LionelEvent),
  Pdi(Vec<u8>),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unit_position_from_bits_test() {
    assert_eq!(UnitPosition::from_bits(0), UnitPosition::Single);
    assert_eq!(UnitPosition::from_bits(1), UnitPosition::Head);
    assert_eq!(UnitPosition::from_bits(2), UnitPosition::Middle);
    //Bit 2 (Richtung) darf Position nicht beeinflussen
    assert_eq!(UnitPosition::from_bits(0x07), UnitPosition::Tail);
  }

  #[test]
  fn start_stop_test() {
    assert!(StartStop::QuickStart.is_start());
    assert!(!StartStop::QuickStart.is_extended());
    assert!(StartStop::ExtendedStop.is_extended());
    assert!(!StartStop::ExtendedStop.is_start());
  }
}
