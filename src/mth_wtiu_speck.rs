//! Speck Variante (32 Bit Block, 64 Bit Schlüssel, 22 Runden) für den WTIU H5/H6 Handshake.
//! Muss Bit für Bit der WTIU Firmware entsprechen, sonst wird die H6 Antwort abgewiesen.

/// Fester Schlüssel der WTIU Firmware
const KEY: [u16; 4] = [5196, 46084, 38013, 32838];
/// Anzahl Runden
const ROUNDS: usize = 22;

/// Speck Rundenfunktion auf 16 Bit Worten
/// # Arguments
/// * x, y - Zustand
/// * k - Rundenschlüssel
fn rrr(mut x: u16, mut y: u16, k: u16) -> (u16, u16) {
  x = x.rotate_right(7);
  x = x.wrapping_add(y);
  x ^= k;
  y = y.rotate_left(2);
  y ^= x;
  (x, y)
}

/// Rundenschlüssel aus KEY.
/// a[i%3] übernimmt das neue x, b das neue y, S[i+1]=b.
fn key_schedule() -> [u16; ROUNDS] {
  let mut s = [0u16; ROUNDS];
  s[0] = KEY[0];
  let mut b = KEY[0];
  let mut a = [KEY[1], KEY[2], KEY[3]];
  for i in 0..(ROUNDS - 1) {
    let (x, y) = rrr(a[i % 3], b, i as u16);
    a[i % 3] = x;
    b = y;
    s[i + 1] = b;
  }
  s
}

/// Verschlüsselt einen Block aus zwei Worten.
/// Reine Funktion ohne Zustand.
/// # Arguments
/// * plain - [p0, p1]
pub fn encrypt(plain: [u16; 2]) -> [u16; 2] {
  let s = key_schedule();
  let mut x = plain[1];
  let mut y = plain[0];
  for k in s {
    (x, y) = rrr(x, y, k);
  }
  [y, x]
}

/// Berechnet die H6 Antwort auf die Challenge aus "H5 <8 Hex> okay".
/// Die beiden Worte werden wie von der WTIU erwartet vertauscht: plain = [Wort2, Wort1].
/// # Arguments
/// * word1, word2 - Challenge Worte in Reihenfolge des Hex Strings
pub fn h6_response(word1: u16, word2: u16) -> String {
  let ct = encrypt([word2, word1]);
  format!("H6{:04X}{:04X}", ct[1], ct[0])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_schedule_test() {
    let s = key_schedule();
    assert_eq!(s[0], 0x144C);
    assert_eq!(s[1], 0x4C84);
    assert_eq!(s[2], 0x75BC);
    assert_eq!(s[10], 0x7ED5);
    assert_eq!(s[21], 0x8A93);
  }

  #[test]
  fn encrypt_golden_test() {
    assert_eq!(encrypt([0x1234, 0x5678]), [0xDB76, 0x1B68]);
    //Reine Funktion, wiederholbar
    assert_eq!(encrypt([0x1234, 0x5678]), encrypt([0x1234, 0x5678]));
  }

  #[test]
  fn h6_response_test() {
    //Mitschnitt einer echten WTIU Sitzung
    assert_eq!(h6_response(0xE043, 0xB8C5), "H6F66059E4");
    assert_eq!(h6_response(0xFA03, 0x69CC), "H6449AE989");
    assert_eq!(h6_response(0x974F, 0xA7CE), "H6F8E78EC0");
  }
}
