//! Verbindung zur MTH WTIU.
//! ASCII Kommandos mit \r\n, Antwort ist freier Text (Erfolg meist mit "okay").
//! Die Verbindung wird über den H5/H6 Handshake (Speck) freigeschaltet.
//!
//! Zustand: Disconnected -> Connecting -> HandshakeH5 -> HandshakeH6 -> Ready -> (Disconnected bei Fehler)
//! Aufbau inkl. Retries erfolgt über WtiuHandshake ohne gehaltenes Session Lock, die fertige
//! Verbindung wird danach mit WtiuSession::attach übernommen.

use crate::{bridge_runtime::SharedClock, mth_wtiu_speck::h6_response};
use log::{debug, info, warn};
use nix::sys::socket::{setsockopt, sockopt::KeepAlive};
use std::{
  io::{self, ErrorKind, Read, Write},
  net::{TcpStream, ToSocketAddrs},
  sync::{Arc, Mutex, MutexGuard},
  time::{Duration, Instant},
};
use thiserror::Error;

/// Default TCP Port der WTIU
pub const WTIU_DEFAULT_PORT: u16 = 33069;
/// Pseudo Lok, über die alle Lashup Kommandos gehen
pub const LASHUP_SELECT_ENGINE: u16 = 102;
/// Abschluss des Lashup Engine List
pub const ENGINE_LIST_TERMINATOR: u8 = 0xFF;
/// Anzahl Handshake Versuche
const HANDSHAKE_ATTEMPTS: usize = 3;
/// Pause zwischen Handshake Versuchen
const HANDSHAKE_BACKOFF: Duration = Duration::from_secs(1);
/// Timeout TCP Verbindungsaufbau
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Prompt der WTIU am Ende jeder Antwort
const WTIU_PROMPT: &str = "->";
/// Wartezeit nach einer vollständigen Zeile ohne Prompt
const LINE_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum WtiuError {
  #[error("WTIU Verbindung nicht bereit")]
  NotReady,
  #[error("WTIU Handshake fehlgeschlagen: {0}")]
  Handshake(String),
  #[error("WTIU Socket Fehler: {0}")]
  Io(#[from] io::Error),
}

/// Byte Transport zur WTIU
pub trait WtiuTransport: Send {
  /// Alle Bytes senden
  fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
  /// Antwort lesen, Ok(None) bei Timeout. Verbindungsende ist ein Fehler.
  /// # Arguments
  /// * timeout - maximale Wartezeit
  fn read_reply(&mut self, timeout: Duration) -> io::Result<Option<String>>;
}

/// Aufbau eines Transports
pub trait WtiuConnector: Send + Sync {
  /// # Arguments
  /// * host - Hostname oder IP der WTIU
  /// * port - TCP Port
  fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn WtiuTransport>>;
}

/// TCP Verbindung mit NoDelay und KeepAlive
pub struct TcpConnector;
impl WtiuConnector for TcpConnector {
  fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn WtiuTransport>> {
    let addr = (host, port)
      .to_socket_addrs()?
      .next()
      .ok_or(io::Error::new(
        ErrorKind::NotFound,
        format!("WTIU Host {} nicht gefunden", host),
      ))?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_nodelay(true)?;
    setsockopt(&stream, KeepAlive, &true).map_err(io::Error::from)?;
    Ok(Box::new(TcpTransport::new(stream)))
  }
}

/// Position des Prompts im Empfangspuffer
fn find_prompt(buffer: &[u8]) -> Option<usize> {
  buffer
    .windows(WTIU_PROMPT.len())
    .position(|w| w == WTIU_PROMPT.as_bytes())
}

/// Antworten können in mehreren Teilen eintreffen, gelesen wird bis zum Prompt
struct TcpTransport {
  stream: TcpStream,
  //Empfangen, noch keiner Antwort zugeordnet
  received: Vec<u8>,
}
impl TcpTransport {
  fn new(stream: TcpStream) -> TcpTransport {
    TcpTransport {
      stream,
      received: Vec::new(),
    }
  }

  /// Verspätete Antworten auf frühere Kommandos verwerfen
  fn discard_stale(&mut self) -> io::Result<()> {
    self.stream.set_nonblocking(true)?;
    let mut buffer = [0u8; 1024];
    let result = loop {
      match self.stream.read(&mut buffer) {
        Ok(0) => {
          break Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            "WTIU hat Verbindung geschlossen",
          ))
        }
        Ok(len) => self.received.extend_from_slice(&buffer[..len]),
        Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
        Err(e) if e.kind() == ErrorKind::Interrupted => {}
        Err(e) => break Err(e),
      }
    };
    self.stream.set_nonblocking(false)?;
    if !self.received.is_empty() {
      debug!(
        "WTIU verspätete Antwort verworfen: {}",
        String::from_utf8_lossy(&self.received).trim()
      );
      self.received.clear();
    }
    result
  }
}
impl WtiuTransport for TcpTransport {
  fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
    self.discard_stale()?;
    self.stream.write_all(data)?;
    self.stream.flush()
  }
  fn read_reply(&mut self, timeout: Duration) -> io::Result<Option<String>> {
    let deadline = Instant::now() + timeout;
    let mut buffer = [0u8; 1024];
    loop {
      if let Some(pos) = find_prompt(&self.received) {
        let reply: Vec<u8> = self.received.drain(..pos + WTIU_PROMPT.len()).collect();
        return Ok(Some(String::from_utf8_lossy(&reply).to_string()));
      }
      //Vollständige Zeile ohne Prompt: nur noch kurz auf den Rest warten
      let line_complete = self.received.ends_with(b"\n");
      let mut wait = deadline.saturating_duration_since(Instant::now());
      if line_complete {
        wait = wait.min(LINE_SETTLE);
      }
      if wait.is_zero() {
        break;
      }
      self.stream.set_read_timeout(Some(wait))?;
      match self.stream.read(&mut buffer) {
        Ok(0) => {
          return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            "WTIU hat Verbindung geschlossen",
          ))
        }
        Ok(len) => self.received.extend_from_slice(&buffer[..len]),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
        Err(e) if e.kind() == ErrorKind::Interrupted => {}
        Err(e) => return Err(e),
      }
    }
    if self.received.ends_with(b"\n") {
      let reply: Vec<u8> = self.received.drain(..).collect();
      return Ok(Some(String::from_utf8_lossy(&reply).to_string()));
    }
    //Unvollständige Antwort gilt als Timeout, Rest wird vor dem nächsten Kommando verworfen
    if !self.received.is_empty() {
      debug!(
        "WTIU Antwort unvollständig: {}",
        String::from_utf8_lossy(&self.received).trim()
      );
    }
    Ok(None)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
  Disconnected,
  Connecting,
  HandshakeH5,
  HandshakeH6,
  Ready,
}

/// Antwort der WTIU auf ein Kommando
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WtiuReply {
  /// Antworttext ohne Prompt, None bei Timeout (weiches OK)
  pub text: Option<String>,
}
impl WtiuReply {
  /// Explizite Bestätigung durch die WTIU
  pub fn is_okay(&self) -> bool {
    self.text.as_ref().map(|t| t.contains("okay")).unwrap_or(false)
  }
  /// Abweisung durch die WTIU (Antwort ohne okay). Timeout gilt nicht als Abweisung.
  pub fn is_rejected(&self) -> bool {
    self.text.is_some() && !self.is_okay()
  }
}

/// Antwort ohne Prompt und Leerzeichen
fn clean_reply(text: &str) -> String {
  text.replace(WTIU_PROMPT, "").trim().to_string()
}

/// Challenge aus "H5 <8 Hex> okay" lesen
/// # Arguments
/// * reply - Antwort auf H5
pub fn parse_h5_challenge(reply: &str) -> Option<(u16, u16)> {
  let start = reply.find("H5")? + 2;
  let hex: String = reply[start..]
    .trim_start()
    .chars()
    .take_while(|c| c.is_ascii_hexdigit())
    .collect();
  if hex.len() < 8 {
    return None;
  }
  let word1 = u16::from_str_radix(&hex[0..4], 16).ok()?;
  let word2 = u16::from_str_radix(&hex[4..8], 16).ok()?;
  Some((word1, word2))
}

/// TIU und AIU Nummer aus der Antwort auf "x" ("x<tiu><aiu>")
/// # Arguments
/// * reply - Antwort auf x
pub fn parse_tiu_info(reply: &str) -> Option<(u8, u8)> {
  let start = reply.find('x')? + 1;
  let digits: Vec<u8> = reply[start..]
    .chars()
    .take_while(|c| c.is_ascii_hexdigit())
    .filter_map(|c| c.to_digit(16).map(|d| d as u8))
    .collect();
  if digits.len() < 2 {
    return None;
  }
  Some((digits[0], digits[1]))
}

/// Verbindungsaufbau inkl. H5/H6 Handshake.
/// Hält kein Lock, Retries mit Pausen über die Clock.
pub struct WtiuHandshake<'a> {
  connector: &'a dyn WtiuConnector,
  clock: SharedClock,
  reply_timeout: Duration,
  state: SessionState,
}

impl<'a> WtiuHandshake<'a> {
  pub fn new(connector: &'a dyn WtiuConnector, clock: SharedClock, reply_timeout: Duration) -> WtiuHandshake<'a> {
    WtiuHandshake {
      connector,
      clock,
      reply_timeout,
      state: SessionState::Disconnected,
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// Verbindung aufbauen und freischalten, bis zu 3 Versuche
  /// # Arguments
  /// * host - WTIU Host
  /// * port - WTIU Port
  pub fn open(&mut self, host: &str, port: u16) -> Result<Box<dyn WtiuTransport>, WtiuError> {
    let mut last_error = WtiuError::NotReady;
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
      match self.try_open(host, port) {
        Ok(transport) => {
          self.state = SessionState::Ready;
          info!("WTIU {}:{} verbunden", host, port);
          return Ok(transport);
        }
        Err(e) => {
          warn!(
            "WTIU {}:{} Versuch {}/{} fehlgeschlagen: {}",
            host, port, attempt, HANDSHAKE_ATTEMPTS, e
          );
          self.state = SessionState::Disconnected;
          last_error = e;
        }
      }
      if attempt < HANDSHAKE_ATTEMPTS {
        self.clock.sleep(HANDSHAKE_BACKOFF);
      }
    }
    Err(last_error)
  }

  fn try_open(&mut self, host: &str, port: u16) -> Result<Box<dyn WtiuTransport>, WtiuError> {
    self.state = SessionState::Connecting;
    let mut transport = self.connector.connect(host, port)?;
    self.state = SessionState::HandshakeH5;
    transport.write_all(b"H5\r\n")?;
    let reply = transport
      .read_reply(self.reply_timeout)?
      .ok_or(WtiuError::Handshake("Keine Antwort auf H5".to_string()))?;
    let (word1, word2) = parse_h5_challenge(&reply)
      .ok_or(WtiuError::Handshake(format!("Ungültige H5 Antwort {}", clean_reply(&reply))))?;
    self.state = SessionState::HandshakeH6;
    let h6 = h6_response(word1, word2);
    debug!("WTIU Challenge {:04X}{:04X} -> {}", word1, word2, h6);
    transport.write_all(format!("{}\r\n", h6).as_bytes())?;
    let reply = transport
      .read_reply(self.reply_timeout)?
      .ok_or(WtiuError::Handshake("Keine Antwort auf H6".to_string()))?;
    //Einige Firmware Versionen senden kein okay
    if !reply.contains("H6") {
      return Err(WtiuError::Handshake(format!(
        "H6 abgewiesen: {}",
        clean_reply(&reply)
      )));
    }
    if !reply.contains("okay") {
      debug!("WTIU H6 ohne okay akzeptiert");
    }
    Ok(transport)
  }
}

/// Die eine Verbindung zur WTIU. Jeder Verkehr zur WTIU läuft hierüber.
/// Immer nur ein Kommando unterwegs: senden, dann synchron auf Antwort oder Timeout warten.
pub struct WtiuSession {
  transport: Option<Box<dyn WtiuTransport>>,
  state: SessionState,
  reply_timeout: Duration,
  roster_timeout: Duration,
  //Cache der letzten Auswahl (y<n>)
  last_selected: Option<u16>,
}

pub type SharedWtiu = Arc<Mutex<WtiuSession>>;

/// Lock auf die Session, auch wenn ein anderer Thread mit dem Lock abgestürzt ist
pub fn lock_session(wtiu: &SharedWtiu) -> MutexGuard<'_, WtiuSession> {
  wtiu.lock().unwrap_or_else(|poisoned| {
    warn!("WTIU Session Lock war vergiftet");
    poisoned.into_inner()
  })
}

impl WtiuSession {
  /// Neue, nicht verbundene Session
  /// # Arguments
  /// * reply_timeout - Timeout normale Kommandos
  /// * roster_timeout - Timeout Roster- und Lokabfragen (I0, I<n>)
  pub fn new(reply_timeout: Duration, roster_timeout: Duration) -> WtiuSession {
    WtiuSession {
      transport: None,
      state: SessionState::Disconnected,
      reply_timeout,
      roster_timeout,
      last_selected: None,
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  pub fn is_ready(&self) -> bool {
    self.state == SessionState::Ready
  }

  /// Verbindungsaufbau läuft (ausserhalb des Locks)
  pub fn set_connecting(&mut self) {
    if self.state == SessionState::Disconnected {
      self.state = SessionState::Connecting;
    }
  }

  /// Verbindungsaufbau fehlgeschlagen
  pub fn set_disconnected(&mut self) {
    self.teardown();
  }

  /// Freigeschaltete Verbindung übernehmen
  /// # Arguments
  /// * transport - Verbindung nach erfolgreichem Handshake
  pub fn attach(&mut self, transport: Box<dyn WtiuTransport>) {
    self.transport = Some(transport);
    self.state = SessionState::Ready;
    self.last_selected = None;
  }

  /// Verbindung schliessen, Auswahl Cache löschen
  pub fn teardown(&mut self) {
    if self.transport.is_some() {
      warn!("WTIU Verbindung getrennt");
    }
    self.transport = None;
    self.state = SessionState::Disconnected;
    self.last_selected = None;
  }

  /// Bytes senden und Antwort abwarten.
  /// Timeout -> weiches OK, Socket Fehler -> Session wird abgebaut.
  /// # Arguments
  /// * data - Kommando inkl. \r\n
  /// * timeout - Wartezeit auf Antwort
  fn exchange(&mut self, data: &[u8], timeout: Duration) -> Result<WtiuReply, WtiuError> {
    if self.state != SessionState::Ready {
      return Err(WtiuError::NotReady);
    }
    let transport = self.transport.as_mut().ok_or(WtiuError::NotReady)?;
    let result = transport
      .write_all(data)
      .and_then(|_| transport.read_reply(timeout));
    match result {
      Ok(text) => {
        let reply = WtiuReply {
          text: text.map(|t| clean_reply(&t)),
        };
        info!(
          "WTIU {} -> {}",
          String::from_utf8_lossy(data).trim_end(),
          reply.text.as_deref().unwrap_or("(Timeout)")
        );
        Ok(reply)
      }
      Err(e) => {
        self.teardown();
        Err(WtiuError::Io(e))
      }
    }
  }

  /// Einzelnes Kommando senden
  /// # Arguments
  /// * cmd - Kommando ohne \r\n
  pub fn send_command(&mut self, cmd: &str) -> Result<WtiuReply, WtiuError> {
    let timeout = self.reply_timeout;
    self.exchange(format!("{}\r\n", cmd).as_bytes(), timeout)
  }

  /// Lok oder Lashup auswählen, nur wenn nicht schon ausgewählt
  /// # Arguments
  /// * number - MTH Loknummer oder Lashup ID
  pub fn select_target(&mut self, number: u16) -> Result<(), WtiuError> {
    if self.last_selected == Some(number) {
      return Ok(());
    }
    self.send_command(&format!("y{}", number))?;
    self.last_selected = Some(number);
    Ok(())
  }

  /// Kommando an eine MTH Lok
  /// # Arguments
  /// * engine - MTH Loknummer
  /// * cmd - Kommando
  pub fn send_to_engine(&mut self, engine: u16, cmd: &str) -> Result<WtiuReply, WtiuError> {
    self.select_target(engine)?;
    self.send_command(cmd)
  }

  /// Kommando an einen Lashup: "|" + Kommando + Engine List (mit Komma und 0xFF)
  /// # Arguments
  /// * cmd - Kommando
  /// * engine_list - Kodierte Engine List, wird unverändert angehängt
  pub fn send_to_lashup(&mut self, cmd: &str, engine_list: &[u8]) -> Result<WtiuReply, WtiuError> {
    self.select_target(LASHUP_SELECT_ENGINE)?;
    let mut data = Vec::with_capacity(cmd.len() + engine_list.len() + 3);
    data.push(b'|');
    data.extend_from_slice(cmd.as_bytes());
    data.extend_from_slice(engine_list);
    data.extend_from_slice(b"\r\n");
    let timeout = self.reply_timeout;
    self.exchange(&data, timeout)
  }

  /// Lashup auf der WTIU erzeugen: "U" + Engine List ohne führendes Komma
  /// # Arguments
  /// * lashup_id - Lashup ID 102-120
  /// * engine_list - Engine List ohne Komma, mit 0xFF
  pub fn create_lashup(&mut self, lashup_id: u16, engine_list: &[u8]) -> Result<WtiuReply, WtiuError> {
    self.select_target(lashup_id)?;
    let mut data = Vec::with_capacity(engine_list.len() + 3);
    data.push(b'U');
    data.extend_from_slice(engine_list);
    data.extend_from_slice(b"\r\n");
    let timeout = self.reply_timeout;
    self.exchange(&data, timeout)
  }

  /// Lok Roster (I0). Die WTIU fragt dafür alle 100 Adressen ab, langer Timeout.
  pub fn query_roster(&mut self) -> Result<WtiuReply, WtiuError> {
    let timeout = self.roster_timeout;
    self.exchange(b"I0\r\n", timeout)
  }

  /// Eigenschaften einer Lok (I<n>), langer Timeout
  /// # Arguments
  /// * engine - MTH Loknummer
  pub fn query_engine(&mut self, engine: u16) -> Result<WtiuReply, WtiuError> {
    let timeout = self.roster_timeout;
    self.exchange(format!("I{}\r\n", engine).as_bytes(), timeout)
  }
}
