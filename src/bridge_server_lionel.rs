//! Lionel Seite: serielle Schnittstelle zur Base (SER2 / LCS) und Sweeper.
//! Der Reader Thread übergibt alle Bytes dem Dekoder, der Sweeper behandelt alle 100ms die Timeouts.
//! PDI Abfragen werden über eine Kopie der Schnittstelle geschrieben.

use crate::{
  bridge_config::LionelConfig,
  bridge_runtime::SharedClock,
  bridge_translator::CommandTranslator,
  lionel_protocol_decoder::PacketDecoder,
  lionel_protocol_pdi::PdiWriter,
};
use log::{debug, error, info, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::{
  io::{self, ErrorKind, Read, Write},
  sync::{Arc, Mutex, MutexGuard},
  thread,
  time::Duration,
};

/// Read Timeout serielle Schnittstelle
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause zwischen Versuchen die Schnittstelle zu öffnen
const SERIAL_REOPEN_DELAY: Duration = Duration::from_secs(5);
/// Versuche pro Ausfall bevor ein Fehler gemeldet wird
const SERIAL_REOPEN_ATTEMPTS: usize = 10;
/// Warnung wenn so lange nichts empfangen wurde
const SERIAL_SILENCE_WARN_MS: u64 = 10000;
/// Zyklus Sweeper
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Dekoder und Translator, immer gemeinsam gelockt
pub struct BridgeCore {
  decoder: PacketDecoder,
  translator: CommandTranslator,
}

pub type SharedCore = Arc<Mutex<BridgeCore>>;

/// Lock auf den Core, auch nach Panic eines anderen Threads
pub fn lock_core(core: &SharedCore) -> MutexGuard<'_, BridgeCore> {
  core.lock().unwrap_or_else(|poisoned| {
    warn!("Core Lock war vergiftet");
    poisoned.into_inner()
  })
}

impl BridgeCore {
  pub fn new(decoder: PacketDecoder, translator: CommandTranslator) -> BridgeCore {
    BridgeCore {
      decoder,
      translator,
    }
  }

  /// Empfangene Bytes verarbeiten
  /// # Arguments
  /// * bytes - Von der Base empfangen
  /// * now - aktuelle Zeit ms
  pub fn feed(&mut self, bytes: &[u8], now: u64) {
    for decoded in self.decoder.feed(bytes, now) {
      self.translator.handle_decoded(decoded, now);
    }
  }

  /// Timeouts von Dekoder und Translator
  /// # Arguments
  /// * now - aktuelle Zeit ms
  pub fn sweep(&mut self, now: u64) {
    for decoded in self.decoder.poll_timeouts(now) {
      self.translator.handle_decoded(decoded, now);
    }
    self.translator.poll(now);
  }

  /// Alle fahrenden Loks anhalten
  pub fn stop_all(&mut self) {
    self.translator.stop_all();
  }
}

/// Schreibzugriff auf die serielle Schnittstelle für PDI Abfragen
#[derive(Default)]
pub struct SerialPdiWriter {
  port: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialPdiWriter {
  fn lock_port(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
    self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Kopie der geöffneten Schnittstelle übernehmen, None wenn geschlossen
  fn attach(&self, port: Option<Box<dyn SerialPort>>) {
    *self.lock_port() = port;
  }
}

impl PdiWriter for SerialPdiWriter {
  fn write_frame(&self, frame: &[u8]) -> bool {
    let mut port = self.lock_port();
    match port.as_mut() {
      Some(port) => match port.write_all(frame).and_then(|_| port.flush()) {
        Ok(_) => {
          debug!("PDI gesendet: {:02X?}", frame);
          true
        }
        Err(e) => {
          warn!("PDI senden fehlgeschlagen: {}", e);
          false
        }
      },
      None => false,
    }
  }
}

/// Bytes lesen bis die Schnittstelle verschwindet
/// # Arguments
/// * reader - Geöffnete Schnittstelle
/// * core - Dekoder / Translator
/// * clock - Zeitbasis
fn pump_serial(reader: &mut dyn Read, core: &SharedCore, clock: &SharedClock) -> io::Error {
  let mut buffer = [0u8; 64];
  let mut last_rx = clock.now_ms();
  let mut silence_warned = false;
  loop {
    match reader.read(&mut buffer) {
      Ok(0) => {
        return io::Error::new(ErrorKind::UnexpectedEof, "Schnittstelle geschlossen");
      }
      Ok(len) => {
        let now = clock.now_ms();
        last_rx = now;
        silence_warned = false;
        lock_core(core).feed(&buffer[..len], now);
      }
      Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
        if !silence_warned && clock.now_ms().saturating_sub(last_rx) >= SERIAL_SILENCE_WARN_MS {
          warn!(
            "Seit {}s keine Daten von der Lionel Base",
            SERIAL_SILENCE_WARN_MS / 1000
          );
          silence_warned = true;
        }
      }
      Err(e) if e.kind() == ErrorKind::Interrupted => {}
      Err(e) => return e,
    }
  }
}

/// Serielle Verbindung zur Lionel Base
pub struct LionelServer {
  config: LionelConfig,
  core: SharedCore,
  clock: SharedClock,
  writer: Arc<SerialPdiWriter>,
}

impl LionelServer {
  /// # Arguments
  /// * config - Schnittstelle und Baudrate
  /// * core - Dekoder / Translator
  /// * clock - Zeitbasis
  /// * writer - Wird bei jedem Öffnen mit einer Kopie der Schnittstelle versorgt
  pub fn new(config: LionelConfig, core: SharedCore, clock: SharedClock, writer: Arc<SerialPdiWriter>) -> LionelServer {
    LionelServer {
      config,
      core,
      clock,
      writer,
    }
  }

  fn open(&self) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(&self.config.port, self.config.baud)
      .data_bits(DataBits::Eight)
      .parity(Parity::None)
      .stop_bits(StopBits::One)
      .flow_control(FlowControl::None)
      .timeout(SERIAL_READ_TIMEOUT)
      .open()
  }

  /// Schnittstelle öffnen, wartet bis sie vorhanden ist
  fn open_with_retry(&self) -> Box<dyn SerialPort> {
    let mut attempt = 0;
    loop {
      match self.open() {
        Ok(port) => {
          info!(
            "Lionel Base {} mit {} Baud geöffnet",
            self.config.port, self.config.baud
          );
          return port;
        }
        Err(e) => {
          attempt += 1;
          if attempt == SERIAL_REOPEN_ATTEMPTS {
            error!(
              "Lionel Base {} nach {} Versuchen nicht verfügbar: {}",
              self.config.port, attempt, e
            );
          } else if attempt < SERIAL_REOPEN_ATTEMPTS {
            warn!("Lionel Base {} nicht verfügbar: {}", self.config.port, e);
          }
        }
      }
      self.clock.sleep(SERIAL_REOPEN_DELAY);
    }
  }

  fn execute(&self) {
    loop {
      let mut port = self.open_with_retry();
      match port.try_clone() {
        Ok(clone) => self.writer.attach(Some(clone)),
        Err(e) => warn!("Keine PDI Abfragen möglich: {}", e),
      }
      let e = pump_serial(&mut port, &self.core, &self.clock);
      self.writer.attach(None);
      warn!("Lionel Base {} getrennt: {}", self.config.port, e);
      self.clock.sleep(SERIAL_REOPEN_DELAY);
    }
  }

  /// Reader Thread starten
  pub fn start(self) -> Result<(), String> {
    thread::Builder::new()
      .name("Lionel".to_string())
      .spawn(move || self.execute())
      .map(|_| ())
      .map_err(|e| format!("Lionel Thread nicht gestartet: {}", e))
  }
}

/// Sweeper Thread starten: alle 100ms Timeouts behandeln
/// # Arguments
/// * core - Dekoder / Translator
/// * clock - Zeitbasis
pub fn start_sweeper(core: SharedCore, clock: SharedClock) -> Result<(), String> {
  thread::Builder::new()
    .name("Sweeper".to_string())
    .spawn(move || loop {
      clock.sleep(SWEEP_INTERVAL);
      lock_core(&core).sweep(clock.now_ms());
    })
    .map(|_| ())
    .map_err(|e| format!("Sweeper Thread nicht gestartet: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    bridge_config::Timing,
    bridge_mapping::{EngineMapping, MemoryMappingStore},
    bridge_runtime::{Clock, ManualClock, QueuedSpawner},
    mth_lashup::LashupManager,
    mth_wtiu_session::mock::{ready_session, sent, MockTransport},
    mth_wtiu_vocabulary::WtiuVocabulary,
  };
  use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
  };

  fn core() -> (SharedCore, Arc<Mutex<Vec<Vec<u8>>>>, Arc<ManualClock>) {
    let (transport, written) = MockTransport::okay();
    let wtiu = ready_session(transport);
    let mapping = Arc::new(RwLock::new(EngineMapping::new(HashMap::new(), HashSet::new())));
    let lashups = Arc::new(Mutex::new(LashupManager::new(mapping.clone(), 2000)));
    let clock = Arc::new(ManualClock::new(0));
    let translator = CommandTranslator::new(
      Timing::default(),
      WtiuVocabulary::default(),
      wtiu,
      lashups,
      mapping,
      Box::new(MemoryMappingStore::default()),
      clock.clone(),
      Arc::new(QueuedSpawner::new()),
    );
    let core = Arc::new(Mutex::new(BridgeCore::new(
      PacketDecoder::new(Timing::default()),
      translator,
    )));
    (core, written, clock)
  }

  #[test]
  fn horn_release_by_sweep_test() {
    let (core, written, _) = core();
    //TMCC1 Lok 5 Horn 1
    lock_core(&core).feed(&[0xFE, 0x02, 0x9C], 0);
    lock_core(&core).feed(&[0xFE, 0x02, 0x9C], 100);
    lock_core(&core).sweep(200);
    assert_eq!(sent(&written), vec!["y6", "w2"]);
    lock_core(&core).sweep(500);
    assert_eq!(sent(&written), vec!["y6", "w2", "bFFFD"]);
  }

  /// Liefert die Teile, dann Timeouts bis `timeouts` aufgebraucht sind, dann Fehler
  struct ScriptedReader {
    chunks: Vec<Vec<u8>>,
    timeouts: usize,
    clock: Arc<ManualClock>,
  }
  impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      if !self.chunks.is_empty() {
        let chunk = self.chunks.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        return Ok(chunk.len());
      }
      if self.timeouts > 0 {
        self.timeouts -= 1;
        self.clock.advance(100);
        return Err(io::Error::new(ErrorKind::TimedOut, "timeout"));
      }
      Err(io::Error::new(ErrorKind::BrokenPipe, "USB entfernt"))
    }
  }

  #[test]
  fn pump_serial_test() {
    let (core, written, clock) = core();
    //Vorwärts für Lok 5 in zwei Teilen
    let mut reader = ScriptedReader {
      chunks: vec![vec![0xFE, 0x02], vec![0x80]],
      timeouts: 150,
      clock: clock.clone(),
    };
    let shared_clock: SharedClock = clock.clone();
    let e = pump_serial(&mut reader, &core, &shared_clock);
    assert_eq!(e.kind(), ErrorKind::BrokenPipe);
    assert_eq!(sent(&written), vec!["y6", "d0"]);
    assert_eq!(clock.now_ms(), 15000);
  }

  #[test]
  fn pdi_writer_without_port_test() {
    let writer = SerialPdiWriter::default();
    assert!(!writer.write_frame(&[0xD1, 0x21, 0x05, 0x01, 0xD9, 0xDF]));
  }
}
