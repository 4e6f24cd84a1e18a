//! lmbridge: Lionel TMCC1 / Legacy -> MTH DCS WTIU Gateway
//! Liest die Kommandos der Lionel Base an der seriellen Schnittstelle und steuert die
//! gleichen Loks über eine MTH WTIU.

use configparser::ini::Ini;
use log::{error, info, warn};
use nix::{
  libc::{SIGHUP, SIGINT, SIGQUIT, SIGTERM},
  unistd::{fork, ForkResult::Parent},
};
use signal_hook::iterator::Signals;
use std::{
  env, fs, process,
  sync::{Arc, Mutex, RwLock},
  thread,
  time::Duration,
};

use crate::{
  bridge_config::BridgeConfig,
  bridge_mapping::{EngineMapping, IniMappingStore, MappingStore, PersistedMapping},
  bridge_runtime::{SharedClock, SystemClock, ThreadSpawner},
  bridge_server_lionel::{lock_core, start_sweeper, BridgeCore, LionelServer, SerialPdiWriter, SharedCore},
  bridge_server_wtiu::{StaticDiscovery, WtiuMonitor},
  bridge_translator::CommandTranslator,
  lionel_protocol_decoder::PacketDecoder,
  mth_lashup::LashupManager,
  mth_wtiu_session::{TcpConnector, WtiuSession},
  mth_wtiu_vocabulary::WtiuVocabulary,
};

mod bridge_config;
mod bridge_engine_state;
mod bridge_mapping;
mod bridge_runtime;
mod bridge_server_lionel;
mod bridge_server_wtiu;
mod bridge_translator;
mod bridge_types;
mod lionel_protocol_decoder;
mod lionel_protocol_pdi;
mod lionel_protocol_tables;
mod mth_lashup;
mod mth_wtiu_session;
mod mth_wtiu_speck;
mod mth_wtiu_vocabulary;

/// PID Filename
const PID_FILE: &str = "/var/run/lmbridge.pid";

///Kommandozeilenparameter
#[derive(Debug)]
struct CmdLineConfig {
  //Zu verwendendes Configfile, Default ist /etc/lmbridge.conf
  config_file: String,
  //fork() ja/nein. Default: ja
  fork: bool,
}

impl CmdLineConfig {
  /// Liefert die aus den Kommandozeilen Argumenten gelesen Konfiguration zurück.
  /// Err mit Fehlertext -> Hilfetextausgabe, Programmabruch
  /// -? -> Hilfetext, Programmabruch
  /// -n -> No fork()
  /// -f configfile -> zu verwendendes Configfile
  /// # Arguments
  /// * args - Kommandozeilenargumente
  fn parse_cmd_line(mut args: impl Iterator<Item = String>) -> Result<CmdLineConfig, String> {
    //Ignoriere arg[0], eigener Pfad
    args.next();
    //Defaults
    let mut cmd_line_config = CmdLineConfig {
      config_file: format!("/etc/{}.conf", env!("CARGO_PKG_NAME")),
      fork: true,
    };
    while let Some(val) = args.next() {
      match val.as_str() {
        "-?" => {
          return Err("".to_string());
        }
        "-n" => {
          cmd_line_config.fork = false;
        }
        "-f" => {
          cmd_line_config.config_file = match args.next() {
            Some(val) => val,
            _ => return Err("-f ohne Configfile".to_string()),
          }
        }
        _ => {
          return Err(format!("Unbekannter Parameter {val}"));
        }
      }
    }
    Ok(cmd_line_config)
  }
}

///Main
fn main() {
  env::set_var("RUST_BACKTRACE", "1");
  if env::var("RUST_LOG").is_err() {
    env::set_var("RUST_LOG", "INFO");
  }
  env_logger::builder().format_timestamp_millis().init();
  if let Err(msg) = start(env::args()) {
    error!("Start Error: {}", msg);
    process::exit(1);
  }
}

/// Alle fahrenden Loks anhalten wenn das Programm terminiert wird
/// # Arguments
/// * core - Dekoder / Translator
fn terminate_stop(core: SharedCore) {
  let mut signals = match Signals::new([SIGTERM, SIGINT, SIGHUP, SIGQUIT]) {
    Ok(signals) => signals,
    Err(e) => {
      error!("Signal Handler nicht installiert: {}", e);
      return;
    }
  };
  if let Some(signal) = signals.forever().next() {
    info!("Signal {} -> alle Loks anhalten", signal);
    lock_core(&core).stop_all();
    //Kurze Pause damit alles gesendet werden kann
    thread::sleep(Duration::from_millis(200));
    del_pidfile();
    process::exit(0);
  }
}

///PID File schreiben
/// # Arguments
/// * pid - Aktuelle, zu schreibende PID
fn write_pidfile(pid: i32) {
  if fs::write(PID_FILE, pid.to_string()).is_err() {
    warn!("PID konnte nicht gespeichert werden.");
  }
}

///PID File löschen
fn del_pidfile() {
  fs::remove_file(PID_FILE).unwrap_or(());
}

/// Gespeicherte Zuordnungen laden, leer wenn noch kein Mapping File existiert
fn load_persisted(store: &dyn MappingStore) -> PersistedMapping {
  match store.load_mapping() {
    Ok(mapping) => {
      info!(
        "{} Lokzuordnungen, {} Lashups geladen",
        mapping.engines.len(),
        mapping.lashups.len()
      );
      mapping
    }
    Err(msg) => {
      info!("Kein Mapping geladen: {}", msg);
      PersistedMapping::default()
    }
  }
}

///Start lmbridge
/// # Arguments
/// * args - Kommandozeilenargumente
fn start(args: impl Iterator<Item = String>) -> Result<(), String> {
  println!(
    "{} V{} {}",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION"),
    env!("CARGO_PKG_HOMEPAGE")
  );
  let cmd_line_config = match CmdLineConfig::parse_cmd_line(args) {
    Ok(v) => v,
    Err(message) => {
      println!("Aufruf: {} [-n] [-f configfile]", env!("CARGO_PKG_NAME"));
      println!("-n No fork()");
      println!("-f configfile Verwende configfile");
      println!("{message}");
      return Ok(());
    }
  };
  //fork() wenn notwendig
  if cmd_line_config.fork {
    info!("fork()");
    let pid = unsafe { fork() };
    if let Parent { child: child_pid } =
      pid.map_err(|e| format!("fork() fehlgeschlagen: {}", e))?
    {
      //PID File schreiben
      write_pidfile(child_pid.into());
      return Ok(());
    }
  }
  //Configfile lesen
  let mut ini = Ini::new();
  let config_file_values = ini.load(&cmd_line_config.config_file).map_err(|e| {
    format!(
      "Configfile {} kann nicht gelesen werden: {}",
      cmd_line_config.config_file, e
    )
  })?;
  let config = BridgeConfig::from_values(&config_file_values)?;
  let clock: SharedClock = Arc::new(SystemClock::new());

  //Lionel -> MTH Zuordnung, gelernte Einträge aus dem Mapping File
  let store = IniMappingStore::new(&config.mapping_file);
  let persisted = load_persisted(&store);
  let mut mapping = EngineMapping::new(config.engine_map.clone(), config.lionel_only.clone());
  for (lionel, mth) in &persisted.engines {
    mapping.learn(*lionel, *mth);
  }
  let mapping = Arc::new(RwLock::new(mapping));
  let mut lashups = LashupManager::new(mapping.clone(), config.timing.lashup_settle);
  let mut used_ids: Vec<u16> = persisted.lashups.values().copied().collect();
  used_ids.sort();
  lashups.restore(&used_ids);
  let lashups = Arc::new(Mutex::new(lashups));

  let wtiu = Arc::new(Mutex::new(WtiuSession::new(
    config.wtiu.reply_timeout,
    config.wtiu.roster_timeout,
  )));
  let mut translator = CommandTranslator::new(
    config.timing,
    WtiuVocabulary::with_overrides(&config.wtiu_commands),
    wtiu.clone(),
    lashups,
    mapping.clone(),
    Box::new(store),
    clock.clone(),
    Arc::new(ThreadSpawner),
  );
  let pdi_writer = Arc::new(SerialPdiWriter::default());
  translator.set_pdi_writer(pdi_writer.clone());
  let core: SharedCore = Arc::new(Mutex::new(BridgeCore::new(
    PacketDecoder::new(config.timing),
    translator,
  )));

  //MTH Seite
  WtiuMonitor::new(
    Box::new(StaticDiscovery::new(
      config.wtiu.hosts.clone(),
      config.wtiu.port,
    )),
    Box::new(TcpConnector),
    wtiu,
    mapping,
    clock.clone(),
    config.wtiu.reply_timeout,
    config.wtiu.health_interval,
  )
  .start()?;
  //Lionel Seite
  LionelServer::new(config.lionel.clone(), core.clone(), clock.clone(), pdi_writer).start()?;
  start_sweeper(core.clone(), clock)?;

  //Loks anhalten und PID File löschen wenn Programm terminiert wird
  terminate_stop(core);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bridge_mapping::MemoryMappingStore;

  #[test]
  fn parse_cmd_line_test() {
    //Keine Kommandozeilenargumente
    let cmd_line_config = CmdLineConfig::parse_cmd_line(vec!["".to_string()].into_iter())
      .expect("Keine Kommandozeilen Argumente sind gültig");
    assert_eq!(cmd_line_config.fork, true);
    assert_eq!(
      cmd_line_config.config_file,
      format!("/etc/{}.conf", env!("CARGO_PKG_NAME"))
    );
    //-?
    let msg = CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-?".to_string()].into_iter())
      .expect_err("Kommandozeilen Argument -? muss leeren Err liefern");
    assert_eq!(msg, "");
    //-blabla -> Error
    let msg =
      CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-blabla".to_string()].into_iter())
        .expect_err("Ungültiges Kommandozeilen Argument muss Err liefern");
    assert_eq!(msg, "Unbekannter Parameter -blabla");
    //-f ohne File
    let msg = CmdLineConfig::parse_cmd_line(vec!["".to_string(), "-f".to_string()].into_iter())
      .expect_err("-f ohne Configfile muss Err liefern");
    assert_eq!(msg, "-f ohne Configfile");
    //-n und -f gültig
    let cmd_line_config = CmdLineConfig::parse_cmd_line(
      vec![
        "".to_string(),
        "-n".to_string(),
        "-f".to_string(),
        "configfilename".to_string(),
      ]
      .into_iter(),
    )
    .expect("Kommandozeilen Argumente -n -f sind gültig");
    assert_eq!(cmd_line_config.fork, false);
    assert_eq!(cmd_line_config.config_file, "configfilename");
  }

  #[test]
  fn load_persisted_test() {
    let mut stored = PersistedMapping::default();
    stored.engines.insert(5, 12);
    let store = MemoryMappingStore::new(stored.clone());
    assert_eq!(load_persisted(&store), stored);
    //Fehlendes File -> leer
    let store = IniMappingStore::new("/nicht/vorhanden/lmbridge.map");
    assert_eq!(load_persisted(&store), PersistedMapping::default());
  }
}
