//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use mims_daq::ingest::tailer::TailerState;
use mims_daq::Session;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Factor sheet covering masses 2, 3, 4, 12, 18, 27, 30, 31, 44 with both
/// isobaric pairs. The denoising cell is blank, so denoising is off.
pub const REFERENCE_FACTORS: &str = "\
M/Z;Name;Cmax;Amax;A0;k;ratio;pH;mass
2;H2;100;2,0;0;0,5;;7;
3;HD;100;2,0;0;0,25
4;D2;100;2,0;0;0,125
12;C;1;1;0;0
18;H2O;1;1;0;0
27;C2H3;1;1;0;0
30;NO;10;2;1;0,1;0,5
31;ETOH;40;4;0;0,2;0,5
31;METOH;30;3;0;0,3
44;CO2;10;2;0;0,1;0,1
44;N2O;20;3;1;0,2
";

pub const REFERENCE_CHANNELS: [&str; 9] = ["2", "3", "4", "12", "18", "27", "30", "31", "44"];

/// Constant ion currents for [`REFERENCE_CHANNELS`], decimal commas included.
pub const REFERENCE_CURRENTS: [&str; 9] = ["1,0", "1,0", "1,0", "0,2", "5,0", "0,5", "4,0", "3,0", "5,0"];

/// Factor sheet with argon as denoising reference and both oxygen isotopes.
pub const DENOISED_FACTORS: &str = "\
M/Z;Name;Cmax;Amax;A0;k;ratio;pH;mass
2;H2;100;2,0;0;0,5;;7;40
3;HD;100;2,0;0;0,25
4;D2;100;2,0;0;0,125
32;O2;200;11;1;0,2
36;18O2;100;11;1;0,1
40;Ar;50;6;1;0,05
";

pub fn header(channels: &[&str]) -> String {
    let quoted: Vec<String> = channels.iter().map(|c| format!("\"{c}\"")).collect();
    format!(";Time;{};\n", quoted.join(";"))
}

/// Data row `minute` minutes after 2024/05/01 10:00:00.
pub fn row(minute: u32, currents: &[&str]) -> String {
    format!(
        ";2024/05/01 {:02}:{:02}:00.0;{};\n",
        10 + minute / 60,
        minute % 60,
        currents.join(";")
    )
}

pub struct Fixture {
    pub dir: TempDir,
    pub factors: PathBuf,
    pub data: PathBuf,
}

impl Fixture {
    pub fn new(factors: &str, data: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let factor_path = dir.path().join("factors.csv");
        let data_path = dir.path().join("data.csv");
        std::fs::write(&factor_path, factors).unwrap();
        std::fs::write(&data_path, data).unwrap();
        Self {
            dir,
            factors: factor_path,
            data: data_path,
        }
    }

    pub fn append(&self, text: &str) {
        append(&self.data, text);
    }
}

pub fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Poll until the session has ingested `rows` rows.
pub async fn wait_for_rows(session: &Session, rows: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.store().row_count() < rows {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {rows} rows"));
}

/// Wait until the producer reports `state`.
pub async fn wait_for_state(session: &Session, state: TailerState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap()
        .unwrap();
}
