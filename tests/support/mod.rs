//! A bash stand-in for the database shell.
//!
//! The stub echoes the sentinel literal back like a real REPL would and
//! understands a handful of commands used by the tests:
//!
//! - `use <db>` prints `switched to db <db>`
//! - anything mentioning `stats` prints a JSON document
//! - `more` prints a page ending in the "more" prompt
//! - `big` prints one 2 MiB line
//! - `straddle` prints a line ending in a stale marker, pausing halfway
//!   through the marker so it arrives in two reads
//! - `benign` writes allow-listed noise to stderr
//! - `fail` writes noise plus a real error line to stderr, then pauses so
//!   the error is seen before the sentinel
//! - `mute` stops echoing sentinels
//! - `exit <n>` exits with code `n`

use std::io::Write;

use dbshell_driver::process::ProcessOptions;
use dbshell_driver::shell::ShellOptions;
use tempfile::NamedTempFile;

pub const STUB_REPL: &str = r#"
muted=0
while IFS= read -r line; do
  case "$line" in
    '"EXECUTION COMPLETED '*)
      if [ "$muted" = 0 ]; then
        line="${line#\"}"
        echo "${line%\"}"
      fi
      ;;
    'use '*) echo "switched to db ${line#use }" ;;
    *stats*) echo '{"ok":1,"count":3}' ;;
    more) printf '%s\n' 1 2 'Type "it" for more' ;;
    big)
      head -c 2097152 /dev/zero | tr '\0' b
      echo
      ;;
    straddle)
      printf 'bbbbEXECUTION COMP'
      sleep 0.2
      echo 'LETED 0123456789'
      ;;
    benign)
      echo "Debugger attached." >&2
      echo "Current Mongosh Log ID: 65f0c0ffee" >&2
      ;;
    fail)
      echo "Debugger attached." >&2
      echo "MongoServerError: ns not found" >&2
      sleep 0.2
      ;;
    mute) muted=1 ;;
    'exit '*) exit "${line#exit }" ;;
    *) ;;
  esac
done
"#;

/// Write `body` to a temporary bash script.
pub fn stub_script(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

pub fn stub_repl() -> NamedTempFile {
    stub_script(STUB_REPL)
}

/// Run the script through `bash` so it never needs the executable bit.
pub fn process_options(script: &NamedTempFile) -> ProcessOptions {
    ProcessOptions::new("bash").args([script.path().to_string_lossy().into_owned()])
}

pub fn shell_options(script: &NamedTempFile) -> ShellOptions {
    ShellOptions::new("bash", "")
        .args([script.path().to_string_lossy().into_owned()])
        .timeout_secs(10)
}
