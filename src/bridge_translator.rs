//! Übersetzung dekodierter Lionel Kommandos in WTIU Kommandos.
//! Hält den Zustand pro Lok / Zug (Geschwindigkeit, Richtung, Glocke, Horn, Rauch, PFA ...)
//! und leitet Zug Kommandos über den Lashup Manager an die WTIU.

use crate::{
  bridge_config::Timing,
  bridge_engine_state::{Capability, EngineState, EngineStates},
  bridge_mapping::{read_mapping, MappingStore, PersistedMapping, SharedMapping},
  bridge_runtime::{elapsed_since, SharedClock, TaskSpawner},
  bridge_types::{
    AuxOption, Decoded, Direction, LionelCommand, LionelEvent, LionelProtocol, LionelTarget,
    StartStop,
  },
  lionel_protocol_pdi::{PdiMessage, PdiWriter},
  mth_lashup::{lock_lashups, ConsistRoute, CreateState, SharedLashups},
  mth_wtiu_session::{lock_session, SharedWtiu, WtiuReply},
  mth_wtiu_vocabulary::WtiuVocabulary,
};
use log::{debug, error, info, warn};
use std::{sync::Arc, time::Duration};

/// Fahrstufen Änderung Boost / Brake TMCC1
const TMCC1_BOOST_STEPS: i16 = 2;
/// Fahrstufen Änderung Boost / Brake Legacy
const LEGACY_BOOST_STEPS: i16 = 13;
/// Lautstärke Änderung pro Tastendruck
const VOLUME_STEP: i16 = 5;
/// Versuche Lashup Erzeugung
const LASHUP_CREATE_ATTEMPTS: usize = 20;
/// Pause zwischen Lashup Erzeugungsversuchen
const LASHUP_CREATE_RETRY: Duration = Duration::from_secs(2);
/// Versuche PDI Consist Abfrage
const PDI_QUERY_ATTEMPTS: usize = 5;
/// Pause zwischen PDI Abfragen
const PDI_QUERY_RETRY: Duration = Duration::from_secs(2);

/// Ziel eines WTIU Kommandos
#[derive(Clone, Debug, PartialEq, Eq)]
enum Route {
  //MTH Loknummer
  Engine(u16),
  Consist(ConsistRoute),
}

pub struct CommandTranslator {
  states: EngineStates,
  vocabulary: Arc<WtiuVocabulary>,
  timing: Timing,
  wtiu: SharedWtiu,
  lashups: SharedLashups,
  mapping: SharedMapping,
  store: Box<dyn MappingStore>,
  clock: SharedClock,
  spawner: Arc<dyn TaskSpawner>,
  pdi_writer: Option<Arc<dyn PdiWriter>>,
}

impl CommandTranslator {
  /// # Arguments
  /// * timing - Entprell- und Timeoutzeiten
  /// * vocabulary - WTIU Kommandos
  /// * wtiu - Die WTIU Session
  /// * lashups - Lashup Manager
  /// * mapping - Lionel -> MTH Zuordnung
  /// * store - Persistenz der Zuordnungen
  /// * clock - Zeitbasis für Hintergrund Tasks
  /// * spawner - Start von Hintergrund Tasks
  pub fn new(timing: Timing, vocabulary: WtiuVocabulary, wtiu: SharedWtiu, lashups: SharedLashups, mapping: SharedMapping,
    store: Box<dyn MappingStore>, clock: SharedClock, spawner: Arc<dyn TaskSpawner>) -> CommandTranslator {
    CommandTranslator {
      states: EngineStates::default(),
      vocabulary: Arc::new(vocabulary),
      timing,
      wtiu,
      lashups,
      mapping,
      store,
      clock,
      spawner,
      pdi_writer: None,
    }
  }

  /// Schreiber für PDI Abfragen an die Base
  pub fn set_pdi_writer(&mut self, writer: Arc<dyn PdiWriter>) {
    self.pdi_writer = Some(writer);
  }

  /// Zustand einer Lok / eines Zuges
  pub fn state(&self, target: LionelTarget) -> Option<&EngineState> {
    self.states.get(target)
  }

  /// Ergebnis des Paket Dekoders verarbeiten
  /// # Arguments
  /// * decoded - Kommando oder PDI Frame
  /// * now - aktuelle Zeit ms
  pub fn handle_decoded(&mut self, decoded: Decoded, now: u64) {
    match decoded {
      Decoded::Event(event) => self.handle_event(event, now),
      Decoded::Pdi(frame) => self.handle_pdi_frame(&frame),
    }
  }

  /// PDI Frame der Base: Consist Daten an den Lashup Manager
  fn handle_pdi_frame(&mut self, frame: &[u8]) {
    match PdiMessage::from_frame(frame) {
      Ok(message) => {
        if lock_lashups(&self.lashups).handle_pdi(&message) {
          self.persist();
        }
      }
      Err(e) => warn!("PDI Frame verworfen: {}", e),
    }
  }

  /// Periodische Arbeiten: Lashup Settle, PFA Ende
  /// # Arguments
  /// * now - aktuelle Zeit ms
  pub fn poll(&mut self, now: u64) {
    let committed = lock_lashups(&self.lashups).poll(now);
    if !committed.is_empty() {
      self.persist();
    }
    let pfa_timeout = self.timing.pfa_timeout;
    for (target, state) in self.states.iter_mut() {
      if state.pfa_step > 0 && elapsed_since(now, state.pfa_last_ms, pfa_timeout) {
        debug!("{} PFA beendet", target.to_string());
        state.pfa_step = 0;
        state.pfa_last_ms = None;
      }
    }
  }

  /// Ein Lionel Kommando übersetzen
  /// # Arguments
  /// * event - Dekodiertes Kommando
  /// * now - aktuelle Zeit ms
  pub fn handle_event(&mut self, event: LionelEvent, now: u64) {
    if event.command.is_consist_setup() {
      if let LionelTarget::Engine(engine) = event.target {
        lock_lashups(&self.lashups).observe(engine, &event.command, now);
      }
      return;
    }
    if event.command == LionelCommand::ClearConsist {
      self.clear_consist(event.target);
      return;
    }
    let route = match self.resolve_route(event.target) {
      Some(route) => route,
      None => return,
    };
    let key = event.target;
    let protocol = event.protocol;
    match event.command {
      LionelCommand::Direction(direction) => self.direction(&route, key, direction),
      LionelCommand::DirectionToggle => {
        let direction = self
          .states
          .get_mut(key)
          .direction
          .unwrap_or(Direction::Forward)
          .toggled();
        self.direction(&route, key, direction);
      }
      LionelCommand::SpeedAbsolute(step) => {
        let state = self.states.get_mut(key);
        match protocol {
          LionelProtocol::Tmcc1 => state.set_tmcc1_speed(step),
          LionelProtocol::Legacy => state.set_legacy_speed(step),
        }
        self.send_speed(&route, key, protocol);
      }
      LionelCommand::SpeedRelative(delta) => {
        self.states.get_mut(key).nudge_speed(protocol, delta as i16);
        self.send_speed(&route, key, protocol);
      }
      LionelCommand::Boost | LionelCommand::Brake => {
        let steps = match protocol {
          LionelProtocol::Tmcc1 => TMCC1_BOOST_STEPS,
          LionelProtocol::Legacy => LEGACY_BOOST_STEPS,
        };
        let delta = if event.command == LionelCommand::Boost {
          steps
        } else {
          -steps
        };
        self.states.get_mut(key).nudge_speed(protocol, delta);
        self.send_speed(&route, key, protocol);
      }
      LionelCommand::StopImmediate => {
        self.states.get_mut(key).set_legacy_speed(0);
        self.send(&route, &self.vocabulary.speed(0));
      }
      LionelCommand::Horn(true) => {
        let state = self.states.get_mut(key);
        state.horn_last_ms = Some(now);
        if !state.horn_held {
          state.horn_held = true;
          self.send(&route, &self.vocabulary.horn(true));
        }
      }
      LionelCommand::Horn(false) => {
        let state = self.states.get_mut(key);
        state.quilling_pitch = None;
        if state.horn_held {
          state.horn_held = false;
          self.send(&route, &self.vocabulary.horn(false));
        }
      }
      LionelCommand::QuillingHorn(level) => self.quilling_horn(&route, key, level, now),
      LionelCommand::BellToggle => {
        let on = !self.states.get_mut(key).bell_on;
        self.bell(&route, key, on, now);
      }
      LionelCommand::Bell(on) => self.bell(&route, key, on, now),
      LionelCommand::FrontCoupler => {
        self.send(&route, &self.vocabulary.coupler(true));
      }
      LionelCommand::RearCoupler => {
        self.send(&route, &self.vocabulary.coupler(false));
      }
      LionelCommand::Aux1(AuxOption::Option1) => {
        self.start_stop(&route, key, StartStop::QuickStart, now)
      }
      LionelCommand::Aux2(AuxOption::Option1) => {
        let state = self.states.get_mut(key);
        state.headlight_on = !state.headlight_on;
        let on = state.headlight_on;
        self.send(&route, &self.vocabulary.headlight(on));
      }
      LionelCommand::Numeric(number) => self.numeric(&route, key, number, now),
      LionelCommand::SmokeLevel(level) => {
        let state = self.states.get_mut(key);
        let previous = state.smoke_level;
        state.smoke_level = level.min(crate::bridge_engine_state::SMOKE_MAX);
        let level = state.smoke_level;
        self.send_smoke(&route, previous, level);
      }
      LionelCommand::EngineStartStop(variant) => self.start_stop(&route, key, variant, now),
      _ => debug!(
        "{} {:?} ohne WTIU Entsprechung",
        key.to_string(),
        event.command
      ),
    }
  }

  /// Ziel auflösen: Lok -> MTH Nummer, Zug -> Lashup
  fn resolve_route(&self, target: LionelTarget) -> Option<Route> {
    match target {
      LionelTarget::Engine(engine) => match read_mapping(&self.mapping).mth_engine(engine) {
        Some(mth) => Some(Route::Engine(mth)),
        None => {
          debug!("Lok {} ist Lionel-only", engine);
          None
        }
      },
      LionelTarget::Train(train) => {
        let route = lock_lashups(&self.lashups).route(train);
        match route {
          Some(route) => Some(Route::Consist(route)),
          None => {
            debug!("Zug {} unbekannt, Kommando verworfen", train);
            self.request_consist_query(train);
            None
          }
        }
      }
    }
  }

  /// Kommando an die WTIU, None wenn nicht gesendet
  fn send(&self, route: &Route, cmd: &str) -> Option<WtiuReply> {
    let mut session = lock_session(&self.wtiu);
    if !session.is_ready() {
      debug!("WTIU nicht verbunden, {} verworfen", cmd);
      return None;
    }
    let result = match route {
      Route::Engine(mth) => session.send_to_engine(*mth, cmd),
      Route::Consist(consist) => session.send_to_lashup(cmd, &consist.engine_list),
    };
    match result {
      Ok(reply) => Some(reply),
      Err(e) => {
        warn!("WTIU Kommando {} fehlgeschlagen: {}", cmd, e);
        None
      }
    }
  }

  fn send_speed(&self, route: &Route, key: LionelTarget, protocol: LionelProtocol) {
    if let Some(state) = self.states.get(key) {
      self.send(route, &self.vocabulary.speed(state.wtiu_speed(protocol)));
    }
  }

  /// Richtung nur senden wenn sie sich ändert
  fn direction(&mut self, route: &Route, key: LionelTarget, direction: Direction) {
    let state = self.states.get_mut(key);
    if state.direction == Some(direction) {
      debug!("{} Richtung {:?} unverändert", key.to_string(), direction);
      return;
    }
    state.direction = Some(direction);
    self.send(route, &self.vocabulary.direction(direction));
  }

  /// Glocke mit Entprellung, Zug länger als einzelne Lok
  fn bell(&mut self, route: &Route, key: LionelTarget, on: bool, now: u64) {
    let debounce = match route {
      Route::Consist(_) => self.timing.bell_consist_debounce,
      Route::Engine(_) => self.timing.bell_debounce,
    };
    if self.states.get_mut(key).accept_bell(on, now, debounce) {
      self.send(route, &self.vocabulary.bell(on));
    } else {
      debug!("{} Glocke {} unterdrückt", key.to_string(), on);
    }
  }

  /// Quilling Horn: ProtoWhistle wenn möglich, sonst normales Horn
  fn quilling_horn(&mut self, route: &Route, key: LionelTarget, level: u8, now: u64) {
    let state = self.states.get_mut(key);
    let needs_enable = match state.protowhistle {
      Capability::Unknown => true,
      Capability::Supported => !state.protowhistle_enabled,
      Capability::Unsupported => false,
    };
    if needs_enable {
      let reply = self.send(route, &self.vocabulary.protowhistle_enable());
      let state = self.states.get_mut(key);
      match reply {
        Some(reply) if reply.is_rejected() => {
          warn!(
            "{} unterstützt kein ProtoWhistle, normales Horn",
            key.to_string()
          );
          state.protowhistle = Capability::Unsupported;
        }
        Some(_) => {
          state.protowhistle = Capability::Supported;
          state.protowhistle_enabled = true;
        }
        //Nicht gesendet, beim nächsten Mal nochmals
        None => {}
      }
    }
    let mut commands = Vec::new();
    let state = self.states.get_mut(key);
    if state.protowhistle == Capability::Supported {
      let bucket = level.min(15) / 4;
      if state.quilling_pitch != Some(bucket) {
        state.quilling_pitch = Some(bucket);
        commands.push(self.vocabulary.protowhistle_pitch(bucket));
      }
    }
    if !state.horn_held {
      state.horn_held = true;
      commands.push(self.vocabulary.horn(true));
    }
    state.horn_last_ms = Some(now);
    for cmd in commands {
      self.send(route, &cmd);
    }
  }

  /// Zifferntasten
  fn numeric(&mut self, route: &Route, key: LionelTarget, number: u8, now: u64) {
    match number {
      1 | 4 => {
        let delta = if number == 1 { VOLUME_STEP } else { -VOLUME_STEP };
        let volume = self.states.get_mut(key).change_volume(delta);
        self.send(route, &self.vocabulary.volume(volume));
      }
      2 | 9 => {
        let state = self.states.get_mut(key);
        let previous = state.smoke_level;
        let level = state.change_smoke(1);
        self.send_smoke(route, previous, level);
      }
      3 | 8 => {
        let state = self.states.get_mut(key);
        let previous = state.smoke_level;
        let level = state.change_smoke(-1);
        self.send_smoke(route, previous, level);
      }
      5 => self.start_stop(route, key, StartStop::QuickStop, now),
      7 => self.pfa(route, key, now),
      _ => debug!("{} Taste {} ohne Funktion", key.to_string(), number),
    }
  }

  /// Rauch: Einschalten aus Stufe 0, dann Stufe
  fn send_smoke(&self, route: &Route, previous: u8, level: u8) {
    if level > 0 && previous == 0 {
      self.send(route, &self.vocabulary.smoke_on());
    }
    self.send(route, &self.vocabulary.smoke_level(level));
  }

  /// Passenger / Freight Announcement: Start, dann Weiterschalten innerhalb pfa_timeout
  fn pfa(&mut self, route: &Route, key: LionelTarget, now: u64) {
    let pfa_timeout = self.timing.pfa_timeout;
    let state = self.states.get_mut(key);
    let cmd = if state.pfa_step == 0 || elapsed_since(now, state.pfa_last_ms, pfa_timeout) {
      state.pfa_step = 1;
      self.vocabulary.pfa_start()
    } else {
      state.pfa_step = state.pfa_step.saturating_add(1);
      self.vocabulary.pfa_advance()
    };
    state.pfa_last_ms = Some(now);
    self.send(route, &cmd);
  }

  /// Start / Stop: doppelte Pakete entprellt, laufende extended Sequenz nicht unterbrechen.
  /// Ein Zug wird beim ersten Start auf der WTIU als Lashup erzeugt.
  fn start_stop(&mut self, route: &Route, key: LionelTarget, variant: StartStop, now: u64) {
    let state = self.states.get_mut(key);
    if let Some((last, at)) = state.start_stop_last {
      if last == variant && now.saturating_sub(at) < self.timing.quick_debounce {
        debug!("{} {:?} doppelt", key.to_string(), variant);
        return;
      }
    }
    if !variant.is_extended() {
      if let Some((extended, at)) = state.extended_last {
        if extended.is_start() == variant.is_start()
          && now.saturating_sub(at) < self.timing.extended_cooldown
        {
          info!(
            "{} {:?} unterdrückt, {:?} läuft",
            key.to_string(),
            variant,
            extended
          );
          return;
        }
      }
    }
    state.start_stop_last = Some((variant, now));
    if variant.is_extended() {
      state.extended_last = Some((variant, now));
    }
    let cmd = self.vocabulary.start_stop(variant);
    match route {
      Route::Consist(consist)
        if variant.is_start() && consist.create_state == CreateState::NotCreated =>
      {
        self.create_lashup(consist.train_id, Some(cmd));
      }
      _ => {
        self.send(route, &cmd);
      }
    }
  }

  /// Lashup im Hintergrund auf der WTIU erzeugen, danach `replay` an den Lashup senden
  fn create_lashup(&self, train_id: u8, replay: Option<String>) {
    let (lashup_id, list) = match lock_lashups(&self.lashups).begin_create(train_id) {
      Some(create) => create,
      None => return,
    };
    let wtiu = self.wtiu.clone();
    let lashups = self.lashups.clone();
    let clock = self.clock.clone();
    self.spawner.spawn(
      format!("Lashup{}", lashup_id),
      Box::new(move || {
        create_lashup_job(train_id, lashup_id, list, wtiu, lashups, clock, replay)
      }),
    );
  }

  /// Zug auflösen: Lashup ID frei, jedes Mitglied aus dem Lashup entfernen
  fn clear_consist(&mut self, target: LionelTarget) {
    let train = match target {
      LionelTarget::Train(train) => Some(train),
      LionelTarget::Engine(engine) => lock_lashups(&self.lashups).train_of(engine),
    };
    let train = match train {
      Some(train) => train,
      None => {
        debug!("{} in keinem Zug", target.to_string());
        return;
      }
    };
    let commands = lock_lashups(&self.lashups).clear(train, &self.vocabulary);
    for (mth, cmd) in commands {
      self.send(&Route::Engine(mth), &cmd);
    }
    self.persist();
  }

  /// Consist eines unbekannten Zuges per PDI bei der Base abfragen
  fn request_consist_query(&self, train_id: u8) {
    let writer = match &self.pdi_writer {
      Some(writer) => writer.clone(),
      None => return,
    };
    if !lock_lashups(&self.lashups).begin_query(train_id) {
      return;
    }
    let lashups = self.lashups.clone();
    let clock = self.clock.clone();
    self.spawner.spawn(
      format!("PDI{}", train_id),
      Box::new(move || consist_query_job(train_id, writer, lashups, clock)),
    );
  }

  /// Zuordnungen und aktive Lashups speichern
  fn persist(&self) {
    //Nie beide Locks gleichzeitig
    let engines = read_mapping(&self.mapping).discovered().clone();
    let lashups = lock_lashups(&self.lashups).active_ids();
    let mapping = PersistedMapping { engines, lashups };
    if let Err(msg) = self.store.save_mapping(&mapping) {
      warn!("Mapping nicht gespeichert: {}", msg);
    }
  }

  /// Alle fahrenden Loks / Züge anhalten (Programmende)
  pub fn stop_all(&mut self) {
    let moving: Vec<LionelTarget> = self
      .states
      .iter_mut()
      .filter(|(_, state)| state.is_moving())
      .map(|(target, _)| *target)
      .collect();
    for target in moving {
      let route = match target {
        LionelTarget::Engine(engine) => read_mapping(&self.mapping).mth_engine(engine).map(Route::Engine),
        LionelTarget::Train(train) => lock_lashups(&self.lashups).route(train).map(Route::Consist),
      };
      self.states.get_mut(target).set_legacy_speed(0);
      if let Some(route) = route {
        info!("{} Halt", target.to_string());
        self.send(&route, &self.vocabulary.speed(0));
      }
    }
  }
}

/// Hintergrund Task: Lashup erzeugen, bis zu 20 Versuche.
/// Hält nie ein Lock während der Pause.
fn create_lashup_job(train_id: u8, lashup_id: u16, list: Vec<u8>, wtiu: SharedWtiu, lashups: SharedLashups, clock: SharedClock,
  replay: Option<String>) {
  for attempt in 1..=LASHUP_CREATE_ATTEMPTS {
    //Zug inzwischen aufgelöst oder neu aufgebaut?
    if !lock_lashups(&lashups).create_pending(train_id, lashup_id) {
      debug!("Lashup {} Erzeugung abgebrochen", lashup_id);
      return;
    }
    let created = {
      let mut session = lock_session(&wtiu);
      if session.is_ready() {
        match session.create_lashup(lashup_id, &list) {
          Ok(reply) => reply.is_okay(),
          Err(e) => {
            warn!("Lashup {} Erzeugung: {}", lashup_id, e);
            false
          }
        }
      } else {
        false
      }
    };
    if created {
      info!(
        "Lashup {} für Zug {} erzeugt (Versuch {})",
        lashup_id, train_id, attempt
      );
      lock_lashups(&lashups).finish_create(train_id, lashup_id, true);
      if let Some(cmd) = replay {
        let mut engine_list = vec![b','];
        engine_list.extend_from_slice(&list);
        if let Err(e) = lock_session(&wtiu).send_to_lashup(&cmd, &engine_list) {
          warn!("Lashup {} {} fehlgeschlagen: {}", lashup_id, cmd, e);
        }
      }
      return;
    }
    if attempt < LASHUP_CREATE_ATTEMPTS {
      clock.sleep(LASHUP_CREATE_RETRY);
    }
  }
  lock_lashups(&lashups).finish_create(train_id, lashup_id, false);
  error!(
    "Lashup {} für Zug {} nicht erzeugt, Kommandos nur best effort",
    lashup_id, train_id
  );
}

/// Hintergrund Task: Consist per PDI abfragen, bis zu 5 Versuche
fn consist_query_job(train_id: u8, writer: Arc<dyn PdiWriter>, lashups: SharedLashups, clock: SharedClock) {
  let frame = PdiMessage::train_request(train_id).to_frame();
  for attempt in 1..=PDI_QUERY_ATTEMPTS {
    if !writer.write_frame(&frame) {
      warn!("PDI Abfrage Zug {} nicht gesendet", train_id);
    }
    clock.sleep(PDI_QUERY_RETRY);
    if lock_lashups(&lashups).has_consist(train_id) {
      info!("Zug {} per PDI erkannt (Versuch {})", train_id, attempt);
      return;
    }
  }
  lock_lashups(&lashups).end_query(train_id);
  warn!("Zug {}: keine Consist Daten von der Base", train_id);
}
