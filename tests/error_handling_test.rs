//! Fatal ingest errors: configuration problems surface from `open`, data
//! errors stop the producer and keep the rows already published.

mod common;

use common::*;
use mims_daq::data::series::SeriesId;
use mims_daq::factor::FactorTable;
use mims_daq::ingest::tailer::{FollowMode, TailerState};
use mims_daq::{ErrorKind, MimsError, Session, SessionOptions};

fn one_shot() -> SessionOptions {
    SessionOptions::default().with_mode(FollowMode::UntilEof)
}

#[tokio::test]
async fn bad_row_keeps_earlier_rows_readable() {
    let mut text = header(&REFERENCE_CHANNELS);
    text.push_str(&row(0, &REFERENCE_CURRENTS));
    text.push_str(&row(1, &REFERENCE_CURRENTS));
    let mut bad = REFERENCE_CURRENTS;
    bad[2] = "abc";
    text.push_str(&row(2, &bad));
    text.push_str(&row(3, &REFERENCE_CURRENTS));

    let fixture = Fixture::new(REFERENCE_FACTORS, &text);
    let session = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .unwrap();

    assert_eq!(session.wait_for_end().await.unwrap(), 2);
    assert_eq!(session.state(), TailerState::Error);
    assert_eq!(session.store().snapshot(SeriesId::Concentration).unwrap().len(), 2);
    assert_eq!(session.store().visible_rows(SeriesId::ExchangeRate), 1);

    let report = session.close().await;
    assert_eq!(report.rows, 2);
    let err = report.error.expect("parse error is reported");
    assert!(matches!(err, MimsError::Parse { line: 4, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[tokio::test]
async fn bad_timestamp_is_a_parse_error() {
    let mut text = header(&REFERENCE_CHANNELS);
    text.push_str(&format!(";01-05-2024 10:00;{};\n", REFERENCE_CURRENTS.join(";")));
    let fixture = Fixture::new(REFERENCE_FACTORS, &text);
    let session = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .unwrap();

    assert_eq!(session.wait_for_end().await.unwrap(), 0);
    let report = session.close().await;
    assert!(matches!(report.error, Some(MimsError::Parse { line: 2, .. })));
}

#[tokio::test]
async fn short_row_is_a_parse_error() {
    let text = header(&REFERENCE_CHANNELS) + &row(0, &REFERENCE_CURRENTS[..4]);
    let fixture = Fixture::new(REFERENCE_FACTORS, &text);
    let session = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .unwrap();
    session.wait_for_end().await.unwrap();
    assert_eq!(session.state(), TailerState::Error);
    session.close().await;
}

#[tokio::test]
async fn empty_file_fails_one_shot_open() {
    let fixture = Fixture::new(REFERENCE_FACTORS, "");
    let err = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MimsError::EmptyDataFile));
}

#[tokio::test]
async fn missing_duplicate_row_fails_open() {
    // 44 with its companion 12 needs a second 44 row for N2O.
    let factors = REFERENCE_FACTORS.replace("44;N2O;20;3;1;0,2\n", "");
    let fixture = Fixture::new(
        &factors,
        &(header(&["2", "12", "44"]) + &row(0, &["1,0", "1,0", "1,0"])),
    );
    let err = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MimsError::MissingFactor(-44)), "{err}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn factor_table_without_mass_two_fails_open() {
    let factors = REFERENCE_FACTORS.replace("2;H2;100;2,0;0;0,5;;7;\n", "");
    let fixture = Fixture::new(
        &factors,
        &(header(&["3", "4"]) + &row(0, &["1,0", "1,0"])),
    );
    let err = Session::open(&fixture.factors, &fixture.data, one_shot())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MimsError::MissingDenoisingMass));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn factor_file_loads_from_disk() {
    let fixture = Fixture::new(REFERENCE_FACTORS, "");
    let table = tokio_test::block_on(FactorTable::load(&fixture.factors)).unwrap();
    assert_eq!(table.get(-44).unwrap().name(), "N2O");
    assert_eq!(table.get(-31).unwrap().name(), "METOH");
    assert_eq!(table.denoising_mass().unwrap(), 1);
    assert_eq!(table.ph().unwrap(), 7.0);
}
