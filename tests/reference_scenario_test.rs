//! End-to-end ingest of a finished log with both isobaric pairs.
//!
//! Values are small enough to check by hand: constant currents give a
//! constant concentration per molecule, so every exchange rate reduces to
//! `k * C / norm` and every cumulative row to `C + v * t`.

mod common;

use common::*;
use mims_daq::data::series::{SeriesId, SeriesSource};
use mims_daq::ingest::tailer::{FollowMode, TailerState};
use mims_daq::layout::inorganic_carbon_correction;
use mims_daq::{Session, SessionOptions};

const NORM: f64 = 2.0;

fn reference_log(rows: u32) -> String {
    let mut text = header(&REFERENCE_CHANNELS);
    for minute in 0..rows {
        text.push_str(&row(minute, &REFERENCE_CURRENTS));
    }
    text
}

fn options() -> SessionOptions {
    SessionOptions {
        normalization_factor: NORM,
        ..SessionOptions::default()
    }
    .with_mode(FollowMode::UntilEof)
}

/// (molecule, concentration, consumption constant)
fn expected_columns() -> Vec<(&'static str, f64, f64)> {
    vec![
        ("H2", 50.0, 0.5),
        ("HD", 50.0, 0.25),
        ("D2", 50.0, 0.125),
        ("NO", 15.0, 0.1),
        ("ETOH", 10.0, 0.2),
        ("METOH", 20.0, 0.3),
        ("CO2", 10.0, 0.1),
        ("N2O", 20.0, 0.2),
        ("Ci", 10.0 * inorganic_carbon_correction(7.0), 0.1),
    ]
}

fn assert_close(actual: f64, expected: f64, what: &str) {
    assert!(
        (actual - expected).abs() < 1e-9 * expected.abs().max(1.0),
        "{what}: expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn finished_log_derives_every_series() {
    let fixture = Fixture::new(REFERENCE_FACTORS, &reference_log(5));
    let session = Session::open(&fixture.factors, &fixture.data, options())
        .await
        .unwrap();

    assert_eq!(session.wait_for_end().await.unwrap(), 5);
    assert_eq!(session.state(), TailerState::Closed);

    let store = session.store();
    let names: Vec<&str> = session.layout().molecule_names().collect();
    let expected = expected_columns();
    assert_eq!(
        names,
        expected.iter().map(|(name, _, _)| *name).collect::<Vec<_>>()
    );

    assert_eq!(store.visible_rows(SeriesId::Concentration), 5);
    assert_eq!(store.visible_rows(SeriesId::Cumulative), 5);
    assert_eq!(store.visible_rows(SeriesId::ExchangeRate), 4);
    assert!(!store.is_available(SeriesId::DenoisedRate));
    assert!(!store.is_available(SeriesId::Hydrogenase));

    let concentration = store.series(SeriesId::Concentration).unwrap();
    let rates = store.series(SeriesId::ExchangeRate).unwrap();
    let cumulative = store.series(SeriesId::Cumulative).unwrap();

    for (t, row) in concentration.iter().enumerate() {
        assert_close(row[0], t as f64, "time");
        for (i, (name, c, _)) in expected.iter().enumerate() {
            assert_close(row[i + 1], *c, name);
        }
    }

    // Rate rows are stamped with the earlier time of each pair.
    for (t, row) in rates.iter().enumerate() {
        assert_close(row[0], t as f64, "rate time");
        for (i, (name, c, k)) in expected.iter().enumerate() {
            assert_close(row[i + 1], k * c / NORM, name);
        }
    }

    for (t, row) in cumulative.iter().enumerate() {
        for (i, (name, c, k)) in expected.iter().enumerate() {
            assert_close(row[i + 1], c + k * c / NORM * t as f64, name);
        }
    }

    let report = session.close().await;
    assert_eq!(report.rows, 5);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn export_tables_carry_unit_labels() {
    let fixture = Fixture::new(REFERENCE_FACTORS, &reference_log(3));
    let session = Session::open(&fixture.factors, &fixture.data, options())
        .await
        .unwrap();
    session.wait_for_end().await.unwrap();

    let table = session.store().export_table(SeriesId::ExchangeRate).unwrap();
    assert_eq!(table.column_labels[0], "Time (min)");
    assert_eq!(table.column_labels[1], "H2  (µM / min)");
    assert_eq!(table.rows.len(), 2);

    let table = session.store().export_table(SeriesId::Concentration).unwrap();
    assert_eq!(table.column_labels.last().unwrap(), "Ci  (µM)");

    let dir = tempfile::tempdir().unwrap();
    let exporter = mims_daq::data::storage::CsvExporter::new(dir.path());
    let path = exporter.export("run_concentration", &table).unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.starts_with("Time (min),H2  (µM),HD  (µM)"));
    assert_eq!(text.lines().count(), 4);

    session.close().await;
}

#[tokio::test]
async fn denoised_family_follows_reference_channel() {
    let channels = ["40", "2", "3", "4", "32", "36"];
    let currents = ["3,0", "1,0", "1,0", "1,0", "6,0", "6,0"];
    let mut text = header(&channels);
    for minute in 0..4 {
        text.push_str(&row(minute, &currents));
    }
    let fixture = Fixture::new(DENOISED_FACTORS, &text);
    let session = Session::open(&fixture.factors, &fixture.data, options())
        .await
        .unwrap();
    session.wait_for_end().await.unwrap();

    let store = session.store();
    for id in SeriesId::ALL {
        assert!(store.is_available(id), "{id} should be available");
    }
    assert_eq!(
        store.column_labels(SeriesId::DenoisedRate).unwrap(),
        vec![
            "Time (min)",
            "H2  (µM / min)",
            "HD  (µM / min)",
            "D2  (µM / min)",
            "O2  (µM / min)",
            "18O2  (µM / min)",
        ]
    );
    assert_eq!(
        store.column_labels(SeriesId::Hydrogenase).unwrap(),
        vec!["Time (min)", "Hydrogenase Activity  (µM / min)"]
    );
    // Exchange is seeded with a zero row at offset 0, so it shows every row.
    assert_eq!(store.visible_rows(SeriesId::OxygenExchange), 4);

    // Constant signals: every oxygen rate is zero and exchange stays put.
    for row in store.series(SeriesId::OxygenRate).unwrap() {
        for value in &row[1..] {
            assert!(value.abs() < 1e-9, "oxygen rate {value}");
        }
    }

    session.close().await;
}

/// Index of the column whose label names `molecule`.
fn column_of(session: &Session, id: SeriesId, molecule: &str) -> usize {
    let prefix = format!("{molecule} ");
    session
        .store()
        .column_labels(id)
        .unwrap()
        .iter()
        .position(|label| label.starts_with(&prefix))
        .unwrap_or_else(|| panic!("{id} has no {molecule} column"))
}

#[tokio::test]
async fn oxygen_and_hydrogenase_from_known_currents() {
    // Ar falls from 20 to 10 µM, so the leak term is -10 / 20 / 0.05 = -10
    // and every denoised rate is `slope + 10 * k * Cp`.
    let channels = ["40", "2", "3", "4", "32", "36"];
    let mut text = header(&channels);
    text.push_str(&row(0, &["3,0", "1,0", "1,0", "1,0", "6,0", "6,0"]));
    text.push_str(&row(1, &["2,0", "0,8", "1,2", "1,0", "5,0", "5,5"]));
    let fixture = Fixture::new(DENOISED_FACTORS, &text);
    let options = SessionOptions {
        normalization_factor: 1.0,
        ..SessionOptions::default()
    }
    .with_mode(FollowMode::UntilEof);
    let session = Session::open(&fixture.factors, &fixture.data, options)
        .await
        .unwrap();
    assert_eq!(session.wait_for_end().await.unwrap(), 2);
    let store = session.store();

    // Previous concentrations: H2 50, HD 50, D2 50, O2 100, 18O2 50.
    let concentration = &store.series(SeriesId::Concentration).unwrap()[0];
    for (molecule, c) in [("H2", 50.0), ("HD", 50.0), ("D2", 50.0), ("O2", 100.0), ("18O2", 50.0), ("Ar", 20.0)] {
        let i = column_of(&session, SeriesId::Concentration, molecule);
        assert_close(concentration[i], c, molecule);
    }

    // H2 goes 50 -> 40 with k = 0.5.
    let rate = &store.series(SeriesId::ExchangeRate).unwrap()[0];
    assert_close(rate[column_of(&session, SeriesId::ExchangeRate, "H2")], 15.0, "H2 rate");

    let denoised = store.series(SeriesId::DenoisedRate).unwrap();
    assert_eq!(denoised.len(), 1);
    assert_close(denoised[0][0], 0.0, "denoised time");
    for (molecule, vd) in [("H2", 240.0), ("HD", 135.0), ("D2", 62.5), ("O2", 180.0), ("18O2", 45.0)] {
        let i = column_of(&session, SeriesId::DenoisedRate, molecule);
        assert_close(denoised[0][i], vd, molecule);
    }

    // ratio = 100 / 50; Uo = 45 * 3, Eo = 180 - 45 * 2.
    let oxygen = store.series(SeriesId::OxygenRate).unwrap();
    assert_eq!(oxygen.len(), 1);
    for (value, expected, what) in [
        (oxygen[0][0], 0.0, "time"),
        (oxygen[0][1], 135.0, "uptake"),
        (oxygen[0][2], 90.0, "evolution"),
        (oxygen[0][3], 225.0, "net"),
    ] {
        assert_close(value, expected, what);
    }

    let exchange = store.series(SeriesId::OxygenExchange).unwrap();
    assert_eq!(exchange.len(), 2);
    assert_eq!(exchange[0], [0.0, 0.0, 0.0, 0.0]);
    for (value, expected, what) in [
        (exchange[1][0], 1.0, "time"),
        (exchange[1][1], 135.0, "uptake"),
        (exchange[1][2], 90.0, "evolution"),
        (exchange[1][3], 225.0, "net"),
    ] {
        assert_close(value, expected, what);
    }

    // D fraction (50 + 25) / 150 = 0.5; (2 * 240 + 135) / 0.5 + |240 + 135 + 62.5|.
    let hydrogenase = store.series(SeriesId::Hydrogenase).unwrap();
    assert_eq!(hydrogenase.len(), 1);
    assert_close(hydrogenase[0][0], 0.0, "hydrogenase time");
    assert_close(hydrogenase[0][1], 1667.5, "hydrogenase");

    session.close().await;
}
