//! MTH Seite: Überwachung der WTIU Verbindung.
//! Alle health_interval wird geprüft, ob die Session bereit ist. Wenn nicht, wird über die
//! Discovery ein Host gesucht, verbunden und freigeschaltet, danach TIU Info und Roster gelesen.

use crate::{
  bridge_mapping::{parse_roster, read_mapping, write_mapping, SharedMapping},
  bridge_runtime::SharedClock,
  mth_wtiu_session::{lock_session, parse_tiu_info, SharedWtiu, WtiuConnector, WtiuHandshake, WtiuSession},
};
use log::{error, info, warn};
use std::{thread, time::Duration};

/// Auffinden der WTIU
pub trait WtiuDiscovery: Send {
  /// Nächster Kandidat, None wenn keiner bekannt ist
  fn discover_host(&mut self) -> Option<(String, u16)>;
}

/// Konfigurierte Hosts der Reihe nach
pub struct StaticDiscovery {
  hosts: Vec<String>,
  port: u16,
  next: usize,
}

impl StaticDiscovery {
  pub fn new(hosts: Vec<String>, port: u16) -> StaticDiscovery {
    StaticDiscovery {
      hosts,
      port,
      next: 0,
    }
  }
}

impl WtiuDiscovery for StaticDiscovery {
  fn discover_host(&mut self) -> Option<(String, u16)> {
    if self.hosts.is_empty() {
      return None;
    }
    let host = self.hosts[self.next % self.hosts.len()].clone();
    self.next = (self.next + 1) % self.hosts.len();
    Some((host, self.port))
  }
}

pub struct WtiuMonitor {
  discovery: Box<dyn WtiuDiscovery>,
  connector: Box<dyn WtiuConnector>,
  wtiu: SharedWtiu,
  mapping: SharedMapping,
  clock: SharedClock,
  reply_timeout: Duration,
  interval: Duration,
}

impl WtiuMonitor {
  /// # Arguments
  /// * discovery - Liefert WTIU Host / Port
  /// * connector - Baut die TCP Verbindung auf
  /// * wtiu - Die Session
  /// * mapping - Erhält das Roster der WTIU
  /// * clock - Zeitbasis
  /// * reply_timeout - Timeout Handshake Antworten
  /// * interval - Prüfintervall
  pub fn new(discovery: Box<dyn WtiuDiscovery>, connector: Box<dyn WtiuConnector>, wtiu: SharedWtiu, mapping: SharedMapping,
    clock: SharedClock, reply_timeout: Duration, interval: Duration) -> WtiuMonitor {
    WtiuMonitor {
      discovery,
      connector,
      wtiu,
      mapping,
      clock,
      reply_timeout,
      interval,
    }
  }

  /// Eine Prüfung, true wenn die Session danach bereit ist
  pub fn check(&mut self) -> bool {
    if lock_session(&self.wtiu).is_ready() {
      return true;
    }
    let (host, port) = match self.discovery.discover_host() {
      Some(candidate) => candidate,
      None => {
        warn!("Keine WTIU gefunden");
        return false;
      }
    };
    lock_session(&self.wtiu).set_connecting();
    //Handshake inkl. Pausen ohne Session Lock
    let mut handshake = WtiuHandshake::new(self.connector.as_ref(), self.clock.clone(), self.reply_timeout);
    match handshake.open(&host, port) {
      Ok(transport) => {
        {
          let mut session = lock_session(&self.wtiu);
          session.attach(transport);
          self.identify(&mut session);
        }
        self.query_engines();
        lock_session(&self.wtiu).is_ready()
      }
      Err(e) => {
        error!("WTIU {}:{} nicht verfügbar: {}", host, port, e);
        lock_session(&self.wtiu).set_disconnected();
        false
      }
    }
  }

  /// TIU Nummer, Version und Roster nach dem Verbinden
  fn identify(&self, session: &mut WtiuSession) {
    match session.send_command("x") {
      Ok(reply) => match reply.text.as_deref().and_then(parse_tiu_info) {
        Some((tiu, aiu)) => info!("WTIU TIU {} AIU {}", tiu, aiu),
        None => warn!("WTIU TIU Nummer unbekannt: {:?}", reply.text),
      },
      Err(e) => warn!("WTIU x: {}", e),
    }
    match session.send_command("!") {
      Ok(reply) => info!(
        "WTIU Version {}",
        reply.text.as_deref().unwrap_or("unbekannt")
      ),
      Err(e) => warn!("WTIU !: {}", e),
    }
    match session.query_roster() {
      Ok(reply) => match reply.text.as_deref().and_then(parse_roster) {
        Some(roster) => write_mapping(&self.mapping).set_roster(roster),
        None => warn!("WTIU Roster nicht lesbar: {:?}", reply.text),
      },
      Err(e) => warn!("WTIU Roster: {}", e),
    }
  }

  /// Eigenschaften aller Loks im Roster loggen.
  /// Lock pro Abfrage, Kommandos der Lionel Seite dazwischen möglich.
  fn query_engines(&self) {
    let roster = read_mapping(&self.mapping).roster();
    for engine in roster {
      let mut session = lock_session(&self.wtiu);
      if !session.is_ready() {
        return;
      }
      match session.query_engine(engine) {
        Ok(reply) => info!(
          "MTH Lok {}: {}",
          engine,
          reply.text.as_deref().unwrap_or("(Timeout)")
        ),
        Err(e) => warn!("MTH Lok {} Abfrage: {}", engine, e),
      }
    }
  }

  /// Überwachungs Thread starten
  pub fn start(mut self) -> Result<(), String> {
    thread::Builder::new()
      .name("WTIU".to_string())
      .spawn(move || loop {
        self.check();
        self.clock.sleep(self.interval);
      })
      .map(|_| ())
      .map_err(|e| format!("WTIU Thread nicht gestartet: {}", e))
  }
}
