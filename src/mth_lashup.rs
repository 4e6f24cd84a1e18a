//! Lionel Züge (Consists) als MTH Lashups.
//! Zugzugehörigkeit wird passiv aus TRAIN_ADDRESS / TRAIN_UNIT Multiwords gelernt (mit Settle Zeit)
//! oder aktiv per PDI bei der Base abgefragt.
//! Jeder Zug erhält eine Lashup ID aus 102..=120. Freigegebene IDs kommen hinten in die Free-List,
//! da die WTIU alte Lashup Inhalte unter einer ID zwischenspeichert.

use crate::{
  bridge_mapping::{read_mapping, SharedMapping},
  bridge_types::{LionelCommand, UnitPosition},
  lionel_protocol_pdi::PdiMessage,
  mth_wtiu_session::ENGINE_LIST_TERMINATOR,
  mth_wtiu_vocabulary::WtiuVocabulary,
};
use log::{debug, info, warn};
use std::{
  collections::{HashMap, HashSet, VecDeque},
  sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;

/// Erste Lashup ID
pub const LASHUP_ID_FIRST: u16 = 102;
/// Letzte Lashup ID
pub const LASHUP_ID_LAST: u16 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LashupError {
  #[error("Keine freie Lashup ID")]
  PoolExhausted,
  #[error("Zug {0} enthält keine MTH Lok")]
  NoMthMembers(u8),
}

/// Lok in einem Zug
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsistMember {
  pub lionel_engine: u8,
  pub position: UnitPosition,
  pub reversed: bool,
}

/// Stand der Lashup Erzeugung auf der WTIU
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateState {
  NotCreated,
  InProgress,
  Created,
  //Nicht nochmals versuchen bis der Zug aufgelöst wird
  Failed,
}

/// Ein aktiver Zug
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistRecord {
  pub train_id: u8,
  pub mth_lashup_id: u16,
  /// Kopf -> Schluss
  pub members: Vec<ConsistMember>,
  /// Mit führendem Komma und 0xFF
  pub engine_list: Vec<u8>,
  pub create_state: CreateState,
  /// MTH Nummern der Mitglieder (ohne Lionel-only)
  pub mth_members: Vec<u16>,
}

impl ConsistRecord {
  pub fn created_on_wtiu(&self) -> bool {
    self.create_state == CreateState::Created
  }

  /// Engine List für das Lashup Erzeugen (ohne Komma)
  pub fn create_list(&self) -> Vec<u8> {
    self.engine_list[1..].to_vec()
  }
}

/// Kopf -> Schluss sortieren, Mittelloks in Reihenfolge der Meldung
pub fn sort_members(members: &mut [ConsistMember]) {
  members.sort_by_key(|m| m.position.order());
}

/// Engine List: pro MTH Lok zwei Hex Ziffern (Bit 7 gesetzt für rückwärts), führendes Komma, 0xFF.
/// Lionel-only Loks werden ausgelassen.
/// # Arguments
/// * members - Sortierte Mitglieder
/// * mth_engine - Lionel Adresse -> MTH Nummer, None für Lionel-only
pub fn encode_engine_list(members: &[ConsistMember], mth_engine: impl Fn(u8) -> Option<u16>) -> (Vec<u8>, Vec<u16>) {
  let mut list = vec![b','];
  let mut mth_members = Vec::new();
  for member in members {
    if let Some(mth) = mth_engine(member.lionel_engine) {
      let mut code = (mth & 0x7F) as u8;
      if member.reversed {
        code |= 0x80;
      }
      list.extend_from_slice(format!("{:02X}", code).as_bytes());
      mth_members.push(mth);
    }
  }
  list.push(ENGINE_LIST_TERMINATOR);
  (list, mth_members)
}

/// Noch nicht übernommener passiv erkannter Zug
struct PendingConsist {
  members: Vec<ConsistMember>,
  //Letztes neues Mitglied
  last_change_ms: u64,
}

/// Routing eines Zug Kommandos
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistRoute {
  pub train_id: u8,
  pub mth_lashup_id: u16,
  pub engine_list: Vec<u8>,
  pub create_state: CreateState,
}

pub struct LashupManager {
  free_ids: VecDeque<u16>,
  consists: HashMap<u8, ConsistRecord>,
  pending: HashMap<u8, PendingConsist>,
  //Lok -> Zug aus TRAIN_ADDRESS, wartet auf TRAIN_UNIT
  engine_train: HashMap<u8, u8>,
  queries: HashSet<u8>,
  mapping: SharedMapping,
  settle_ms: u64,
}

pub type SharedLashups = Arc<Mutex<LashupManager>>;

/// Lock auf den Lashup Manager, auch nach Panic eines anderen Threads
pub fn lock_lashups(lashups: &SharedLashups) -> MutexGuard<'_, LashupManager> {
  lashups.lock().unwrap_or_else(|poisoned| {
    warn!("Lashup Lock war vergiftet");
    poisoned.into_inner()
  })
}

impl LashupManager {
  /// # Arguments
  /// * mapping - Lionel -> MTH Zuordnung (nur lesend)
  /// * settle_ms - Wartezeit ohne neues Mitglied bis ein Zug übernommen wird
  pub fn new(mapping: SharedMapping, settle_ms: u64) -> LashupManager {
    LashupManager {
      free_ids: (LASHUP_ID_FIRST..=LASHUP_ID_LAST).collect(),
      consists: HashMap::new(),
      pending: HashMap::new(),
      engine_train: HashMap::new(),
      queries: HashSet::new(),
      mapping,
      settle_ms,
    }
  }

  /// IDs der letzten Laufzeit ans Ende der Free-List, die WTIU kennt sie evtl. noch
  /// # Arguments
  /// * used_ids - Lashup IDs aus dem Mapping File
  pub fn restore(&mut self, used_ids: &[u16]) {
    for id in used_ids {
      if let Some(pos) = self.free_ids.iter().position(|f| f == id) {
        self.free_ids.remove(pos);
        self.free_ids.push_back(*id);
      }
    }
  }

  /// Aktive Züge: Zug -> Lashup ID
  pub fn active_ids(&self) -> HashMap<u8, u16> {
    self
      .consists
      .iter()
      .map(|(train, record)| (*train, record.mth_lashup_id))
      .collect()
  }

  pub fn has_consist(&self, train_id: u8) -> bool {
    self.consists.contains_key(&train_id)
  }

  pub fn consist(&self, train_id: u8) -> Option<&ConsistRecord> {
    self.consists.get(&train_id)
  }

  /// Zug, in dem eine Lok ist
  pub fn train_of(&self, lionel_engine: u8) -> Option<u8> {
    self
      .consists
      .values()
      .find(|r| r.members.iter().any(|m| m.lionel_engine == lionel_engine))
      .map(|r| r.train_id)
  }

  /// Zug übernehmen und Lashup ID zuweisen.
  /// Gleiche Zusammensetzung behält die ID, geänderte erhält eine neue (alte hinten in die Free-List).
  /// # Arguments
  /// * train_id - Lionel Zug
  /// * members - Mitglieder in beliebiger Reihenfolge
  pub fn allocate(&mut self, train_id: u8, mut members: Vec<ConsistMember>) -> Result<&ConsistRecord, LashupError> {
    sort_members(&mut members);
    let (engine_list, mth_members) = {
      let mapping = read_mapping(&self.mapping);
      encode_engine_list(&members, |l| mapping.mth_engine(l))
    };
    if mth_members.is_empty() {
      return Err(LashupError::NoMthMembers(train_id));
    }
    let unchanged = self
      .consists
      .get(&train_id)
      .map(|r| r.engine_list == engine_list && r.members == members)
      .unwrap_or(false);
    if !unchanged {
      if self.free_ids.is_empty() && !self.consists.contains_key(&train_id) {
        return Err(LashupError::PoolExhausted);
      }
      //Neue ID vor Freigabe der alten, damit diese nicht sofort wieder verwendet wird
      let id = self.free_ids.pop_front();
      if let Some(old) = self.consists.remove(&train_id) {
        info!("Zug {} neu aufgebaut, Lashup {} freigegeben", train_id, old.mth_lashup_id);
        self.free_ids.push_back(old.mth_lashup_id);
      }
      let id = match id {
        Some(id) => id,
        None => self.free_ids.pop_front().ok_or(LashupError::PoolExhausted)?,
      };
      info!(
        "Zug {} -> Lashup {} {:?}",
        train_id, id, mth_members
      );
      self.consists.insert(
        train_id,
        ConsistRecord {
          train_id,
          mth_lashup_id: id,
          members,
          engine_list,
          create_state: CreateState::NotCreated,
          mth_members,
        },
      );
    }
    self
      .consists
      .get(&train_id)
      .ok_or(LashupError::NoMthMembers(train_id))
  }

  /// Zug auflösen, ID hinten in die Free-List.
  /// Liefert die Kommandos (MTH Lok, Kommando), die an jedes Mitglied gehen müssen.
  /// # Arguments
  /// * train_id - Lionel Zug
  /// * vocabulary - WTIU Kommandos
  pub fn clear(&mut self, train_id: u8, vocabulary: &WtiuVocabulary) -> Vec<(u16, String)> {
    self.pending.remove(&train_id);
    self.engine_train.retain(|_, t| *t != train_id);
    match self.consists.remove(&train_id) {
      Some(record) => {
        info!("Zug {} aufgelöst, Lashup {} frei", train_id, record.mth_lashup_id);
        self.free_ids.push_back(record.mth_lashup_id);
        let mut commands = Vec::new();
        for mth in record.mth_members {
          commands.push((mth, vocabulary.lashup_remove()));
          commands.push((mth, vocabulary.feature_reset()));
        }
        commands
      }
      None => vec![],
    }
  }

  /// Consist Aufbau Kommandos beobachten
  /// # Arguments
  /// * lionel_engine - Lok, an die das Kommando ging
  /// * command - TRAIN_ADDRESS, TRAIN_UNIT, UnitAssignment
  /// * now - aktuelle Zeit ms
  pub fn observe(&mut self, lionel_engine: u8, command: &LionelCommand, now: u64) {
    match command {
      LionelCommand::TrainAddress(0) => {
        //Lok aus Zug entfernt, auch aus einem bereits übernommenen Zug
        let train = self
          .engine_train
          .remove(&lionel_engine)
          .or_else(|| self.train_of(lionel_engine));
        if let Some(train) = train {
          let pending = self.pending_for(train, now);
          pending.members.retain(|m| m.lionel_engine != lionel_engine);
          pending.last_change_ms = now;
        }
      }
      LionelCommand::TrainAddress(train) => {
        debug!("Lok {} -> Zug {}", lionel_engine, train);
        //Wechsel aus einem anderen Zug
        if let Some(old_train) = self.train_of(lionel_engine).filter(|t| t != train) {
          let pending = self.pending_for(old_train, now);
          pending.members.retain(|m| m.lionel_engine != lionel_engine);
          pending.last_change_ms = now;
        }
        self.engine_train.insert(lionel_engine, *train);
      }
      LionelCommand::TrainUnit { position, reversed }
      | LionelCommand::UnitAssignment { position, reversed } => {
        let train = match self.engine_train.get(&lionel_engine) {
          Some(train) => *train,
          None => {
            debug!("Lok {} Position ohne Zugadresse ignoriert", lionel_engine);
            return;
          }
        };
        let pending = self.pending_for(train, now);
        let member = ConsistMember {
          lionel_engine,
          position: *position,
          reversed: *reversed,
        };
        match pending
          .members
          .iter_mut()
          .find(|m| m.lionel_engine == lionel_engine)
        {
          Some(existing) => *existing = member,
          None => pending.members.push(member),
        }
        pending.last_change_ms = now;
      }
      _ => {}
    }
  }

  /// Offener Zug. Ein bereits übernommener Zug startet mit seinen bisherigen Mitgliedern.
  fn pending_for(&mut self, train: u8, now: u64) -> &mut PendingConsist {
    let members = self
      .consists
      .get(&train)
      .map(|r| r.members.clone())
      .unwrap_or_default();
    self.pending.entry(train).or_insert(PendingConsist {
      members,
      last_change_ms: now,
    })
  }

  /// Züge übernehmen, deren letztes neues Mitglied mindestens settle_ms her ist
  /// Liefert die übernommenen Zug Nummern
  /// # Arguments
  /// * now - aktuelle Zeit ms
  pub fn poll(&mut self, now: u64) -> Vec<u8> {
    let settled: Vec<u8> = self
      .pending
      .iter()
      .filter(|(_, p)| now.saturating_sub(p.last_change_ms) >= self.settle_ms)
      .map(|(train, _)| *train)
      .collect();
    let mut committed = Vec::new();
    for train in settled {
      if let Some(pending) = self.pending.remove(&train) {
        if pending.members.is_empty() {
          //Letzte Lok entfernt
          if let Some(old) = self.consists.remove(&train) {
            info!("Zug {} ohne Mitglieder, Lashup {} frei", train, old.mth_lashup_id);
            self.free_ids.push_back(old.mth_lashup_id);
            committed.push(train);
          }
          continue;
        }
        match self.allocate(train, pending.members) {
          Ok(_) => committed.push(train),
          Err(e) => warn!("Zug {} nicht übernommen: {}", train, e),
        }
      }
    }
    committed
  }

  /// PDI Antwort der Base auswerten
  /// Liefert true wenn ein Zug übernommen wurde
  /// # Arguments
  /// * message - Gültige PDI Meldung
  pub fn handle_pdi(&mut self, message: &PdiMessage) -> bool {
    let consist = match message.train_consist() {
      Some(consist) => consist,
      None => {
        debug!("PDI Meldung ohne Consist Daten: {:?}", message);
        return false;
      }
    };
    let members = consist
      .members
      .iter()
      .map(|slot| ConsistMember {
        lionel_engine: slot.tmcc_id,
        position: slot.position,
        reversed: slot.reversed,
      })
      .collect();
    self.queries.remove(&consist.train_id);
    match self.allocate(consist.train_id, members) {
      Ok(_) => true,
      Err(e) => {
        warn!("Zug {} aus PDI nicht übernommen: {}", consist.train_id, e);
        false
      }
    }
  }

  /// Route eines Zuges, None wenn unbekannt
  pub fn route(&self, train_id: u8) -> Option<ConsistRoute> {
    self.consists.get(&train_id).map(|r| ConsistRoute {
      train_id,
      mth_lashup_id: r.mth_lashup_id,
      engine_list: r.engine_list.clone(),
      create_state: r.create_state,
    })
  }

  /// Lashup Erzeugung beginnen, nur wenn noch nicht erzeugt / fehlgeschlagen / laufend.
  /// Liefert Lashup ID und Engine List ohne Komma
  pub fn begin_create(&mut self, train_id: u8) -> Option<(u16, Vec<u8>)> {
    let record = self.consists.get_mut(&train_id)?;
    if record.create_state != CreateState::NotCreated {
      return None;
    }
    record.create_state = CreateState::InProgress;
    Some((record.mth_lashup_id, record.create_list()))
  }

  /// Läuft die Erzeugung dieser Lashup ID noch?
  pub fn create_pending(&self, train_id: u8, lashup_id: u16) -> bool {
    self
      .consists
      .get(&train_id)
      .map(|r| r.mth_lashup_id == lashup_id && r.create_state == CreateState::InProgress)
      .unwrap_or(false)
  }

  /// Ergebnis der Erzeugung, ignoriert wenn der Zug inzwischen neu aufgebaut wurde
  pub fn finish_create(&mut self, train_id: u8, lashup_id: u16, created: bool) {
    if let Some(record) = self.consists.get_mut(&train_id) {
      if record.mth_lashup_id == lashup_id {
        record.create_state = if created {
          CreateState::Created
        } else {
          CreateState::Failed
        };
      }
    }
  }

  /// PDI Abfrage beginnen, false wenn schon eine läuft oder der Zug bekannt ist
  pub fn begin_query(&mut self, train_id: u8) -> bool {
    if self.consists.contains_key(&train_id) {
      return false;
    }
    self.queries.insert(train_id)
  }

  pub fn end_query(&mut self, train_id: u8) {
    self.queries.remove(&train_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    bridge_mapping::EngineMapping,
    lionel_protocol_pdi::{PDI_ACTION_READ, PDI_CMD_BASE_TRAIN},
  };
  use std::{collections::HashSet, sync::RwLock};

  fn manager(lionel_only: &[u8]) -> LashupManager {
    let mapping = EngineMapping::new(HashMap::new(), lionel_only.iter().copied().collect::<HashSet<u8>>());
    LashupManager::new(Arc::new(RwLock::new(mapping)), 2000)
  }

  fn member(lionel_engine: u8, position: UnitPosition, reversed: bool) -> ConsistMember {
    ConsistMember {
      lionel_engine,
      position,
      reversed,
    }
  }

  fn single(lionel_engine: u8) -> Vec<ConsistMember> {
    vec![member(lionel_engine, UnitPosition::Head, false)]
  }

  #[test]
  fn engine_list_test() {
    let members = vec![
      member(11, UnitPosition::Tail, true),
      member(5, UnitPosition::Head, false),
      member(7, UnitPosition::Middle, false),
    ];
    let mut members = members;
    sort_members(&mut members);
    let (list, mth) = encode_engine_list(&members, |l| if l == 7 { None } else { Some(l as u16 + 1) });
    assert_eq!(list, b",068C\xFF".to_vec());
    assert_eq!(mth, vec![6, 12]);
  }

  #[test]
  fn pool_exhaustion_test() {
    let mut lashups = manager(&[]);
    for train in 1..=19u8 {
      let id = lashups.allocate(train, single(train)).unwrap().mth_lashup_id;
      assert_eq!(id, 101 + train as u16);
    }
    assert_eq!(lashups.consist(19).unwrap().mth_lashup_id, 120);
    assert_eq!(
      lashups.allocate(20, single(20)).unwrap_err(),
      LashupError::PoolExhausted
    );
    //Einzige freie ID nach Auflösen
    lashups.clear(3, &WtiuVocabulary::default());
    assert_eq!(lashups.allocate(20, single(20)).unwrap().mth_lashup_id, 104);
  }

  #[test]
  fn no_immediate_reuse_test() {
    let mut lashups = manager(&[]);
    for train in 1..=3u8 {
      lashups.allocate(train, single(train)).unwrap();
    }
    let commands = lashups.clear(1, &WtiuVocabulary::default());
    assert_eq!(
      commands,
      vec![(2, "ul".to_string()), (2, "ab5".to_string())]
    );
    //102 ist hinten in der Free-List
    assert_eq!(lashups.allocate(4, single(4)).unwrap().mth_lashup_id, 105);
    //Zug neu aufgebaut -> neue ID
    let members = vec![
      member(2, UnitPosition::Head, false),
      member(9, UnitPosition::Tail, true),
    ];
    assert_eq!(lashups.allocate(2, members.clone()).unwrap().mth_lashup_id, 106);
    //Gleiche Zusammensetzung behält die ID
    assert_eq!(lashups.allocate(2, members).unwrap().mth_lashup_id, 106);
  }

  #[test]
  fn lionel_only_members_test() {
    let mut lashups = manager(&[4, 8]);
    let record = lashups
      .allocate(
        1,
        vec![
          member(4, UnitPosition::Head, false),
          member(5, UnitPosition::Tail, false),
        ],
      )
      .unwrap();
    assert_eq!(record.engine_list, b",06\xFF".to_vec());
    assert_eq!(record.create_list(), b"06\xFF".to_vec());
    assert_eq!(
      lashups.allocate(2, single(8)).unwrap_err(),
      LashupError::NoMthMembers(2)
    );
  }

  #[test]
  fn passive_detection_settle_test() {
    let mut lashups = manager(&[]);
    lashups.observe(5, &LionelCommand::TrainAddress(3), 0);
    lashups.observe(
      5,
      &LionelCommand::TrainUnit {
        position: UnitPosition::Head,
        reversed: false,
      },
      100,
    );
    lashups.observe(7, &LionelCommand::TrainAddress(3), 1500);
    lashups.observe(
      7,
      &LionelCommand::TrainUnit {
        position: UnitPosition::Tail,
        reversed: true,
      },
      1600,
    );
    //Settle Zeit läuft ab dem letzten Mitglied
    assert!(lashups.poll(2200).is_empty());
    assert!(!lashups.has_consist(3));
    assert_eq!(lashups.poll(3600), vec![3]);
    let record = lashups.consist(3).unwrap();
    assert_eq!(record.engine_list, b",0688\xFF".to_vec());
    assert_eq!(lashups.train_of(7), Some(3));
  }

  fn join(lashups: &mut LashupManager, engine: u8, train: u8, position: UnitPosition, reversed: bool, now: u64) {
    lashups.observe(engine, &LionelCommand::TrainAddress(train), now);
    lashups.observe(engine, &LionelCommand::TrainUnit { position, reversed }, now);
  }

  #[test]
  fn member_added_to_committed_train_test() {
    let mut lashups = manager(&[]);
    join(&mut lashups, 5, 3, UnitPosition::Head, false, 0);
    join(&mut lashups, 7, 3, UnitPosition::Tail, true, 100);
    assert_eq!(lashups.poll(2100), vec![3]);
    assert_eq!(lashups.consist(3).unwrap().mth_lashup_id, 102);
    //Lok 9 kommt später als Mittellok dazu
    join(&mut lashups, 9, 3, UnitPosition::Middle, false, 10000);
    assert!(lashups.poll(11000).is_empty());
    assert_eq!(lashups.poll(12100), vec![3]);
    let record = lashups.consist(3).unwrap();
    assert_eq!(record.members.len(), 3);
    assert_eq!(record.engine_list, b",060A88\xFF".to_vec());
    assert_eq!(record.mth_members, vec![6, 10, 8]);
    //Neue Zusammensetzung -> neue ID
    assert_eq!(record.mth_lashup_id, 103);
    assert_eq!(lashups.train_of(9), Some(3));
  }

  #[test]
  fn member_removed_from_committed_train_test() {
    let mut lashups = manager(&[]);
    join(&mut lashups, 5, 3, UnitPosition::Head, false, 0);
    join(&mut lashups, 7, 3, UnitPosition::Middle, false, 0);
    join(&mut lashups, 9, 3, UnitPosition::Tail, true, 0);
    assert_eq!(lashups.poll(2000), vec![3]);
    lashups.observe(7, &LionelCommand::TrainAddress(0), 5000);
    assert_eq!(lashups.poll(7000), vec![3]);
    let record = lashups.consist(3).unwrap();
    assert_eq!(record.engine_list, b",068A\xFF".to_vec());
    assert_eq!(lashups.train_of(7), None);
    //Ohne TRAIN_ADDRESS gelernter Zug (PDI): Entfernen über die Mitgliedschaft
    let mut lashups = manager(&[]);
    lashups
      .allocate(
        4,
        vec![
          member(10, UnitPosition::Head, false),
          member(12, UnitPosition::Tail, false),
        ],
      )
      .unwrap();
    lashups.observe(12, &LionelCommand::TrainAddress(0), 0);
    assert_eq!(lashups.poll(2000), vec![4]);
    assert_eq!(lashups.consist(4).unwrap().engine_list, b",0B\xFF".to_vec());
    //Letzte Lok entfernt -> Zug aufgelöst, ID frei
    lashups.observe(10, &LionelCommand::TrainAddress(0), 3000);
    assert_eq!(lashups.poll(5000), vec![4]);
    assert!(!lashups.has_consist(4));
    assert!(lashups.route(4).is_none());
  }

  #[test]
  fn unit_without_train_address_test() {
    let mut lashups = manager(&[]);
    lashups.observe(
      5,
      &LionelCommand::TrainUnit {
        position: UnitPosition::Head,
        reversed: false,
      },
      0,
    );
    assert!(lashups.poll(10000).is_empty());
  }

  #[test]
  fn create_state_test() {
    let mut lashups = manager(&[]);
    lashups.allocate(1, single(5)).unwrap();
    let (id, list) = lashups.begin_create(1).unwrap();
    assert_eq!(id, 102);
    assert_eq!(list, b"06\xFF".to_vec());
    //Nur einmal
    assert_eq!(lashups.begin_create(1), None);
    assert!(lashups.create_pending(1, 102));
    lashups.finish_create(1, 102, false);
    assert_eq!(lashups.route(1).unwrap().create_state, CreateState::Failed);
    assert_eq!(lashups.begin_create(1), None);
    //Nach Auflösen wieder möglich
    lashups.clear(1, &WtiuVocabulary::default());
    lashups.allocate(1, single(5)).unwrap();
    assert!(lashups.begin_create(1).is_some());
  }

  #[test]
  fn restore_test() {
    let mut lashups = manager(&[]);
    lashups.restore(&[102, 103]);
    assert_eq!(lashups.allocate(1, single(1)).unwrap().mth_lashup_id, 104);
  }

  #[test]
  fn pdi_consist_test() {
    let mut lashups = manager(&[]);
    assert!(lashups.begin_query(4));
    assert!(!lashups.begin_query(4));
    let mut payload = vec![0xFFu8; 0x90];
    payload[0x6F] = 0x01;
    payload[0x70] = 10;
    payload[0x71] = 0x01;
    payload[0x72] = 12;
    payload[0x73] = 0x07;
    let message = PdiMessage::new(PDI_CMD_BASE_TRAIN, 4, PDI_ACTION_READ, payload);
    assert!(lashups.handle_pdi(&message));
    assert_eq!(lashups.consist(4).unwrap().engine_list, b",0B8D\xFF".to_vec());
    assert!(!lashups.begin_query(4));
  }
}
