use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::{fs::File, path::Path};
use model::*;

mod wire;

pub use wire::*;

/// Reads reference laps from a CSV file with one row per sample. A change of
/// `lap_number` (or of the game/car/track columns) starts a new lap.
pub fn import_csv(path: &Path) -> Result<Vec<Lap>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut laps = Vec::<Lap>::new();
    let mut current: Option<Lap> = None;
    for rec in rdr.deserialize() {
        let r: CsvRow = rec?;
        let same = current.as_ref().map_or(false, |l| {
            l.meta.lap_number == r.lap_number && l.meta.track == r.track && l.meta.car == r.car && l.meta.game == r.game
        });
        if !same {
            if let Some(l) = current.take() {
                laps.push(l);
            }
            current = Some(new_lap(&r));
        }
        if let Some(l) = &mut current {
            let t0 = l.points.first().map(|p| p.t_ms).unwrap_or(r.t_ms);
            l.points.push(TelemetryPoint {
                t_ms: r.t_ms,
                distance_m: r.distance_m,
                speed_ms: r.speed_ms,
                throttle: r.throttle,
                brake: r.brake,
                gear: r.gear,
            });
            l.total_time_ms = (r.t_ms - t0).max(0.0) as u64;
        }
    }
    if let Some(l) = current.take() {
        laps.push(l);
    }
    Ok(laps)
}

pub fn export_csv(laps: &[Lap], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for l in laps {
        for p in &l.points {
            w.serialize(CsvRow {
                game: l.meta.game.clone(),
                car: l.meta.car.clone(),
                track: l.meta.track.clone(),
                lap_number: l.meta.lap_number,
                t_ms: p.t_ms,
                distance_m: p.distance_m,
                speed_ms: p.speed_ms,
                throttle: p.throttle,
                brake: p.brake,
                gear: p.gear,
            })?;
        }
    }
    w.flush()?;
    Ok(())
}

/// One JSON-encoded `Lap` per line. Blank lines are skipped.
pub fn import_ndjson(path: &Path) -> Result<Vec<Lap>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let rdr = std::io::BufReader::new(f);
    let mut laps = vec![];
    for (n, line) in rdr.lines().enumerate() {
        let s = line?;
        if s.trim().is_empty() {
            continue;
        }
        let l: Lap = serde_json::from_str(&s).with_context(|| format!("{}:{}", path.display(), n + 1))?;
        laps.push(l);
    }
    Ok(laps)
}

pub fn export_ndjson(laps: &[Lap], path: &Path) -> Result<()> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    for l in laps {
        let s = serde_json::to_string(l)?;
        writeln!(w, "{}", s)?;
    }
    w.flush()?;
    Ok(())
}

/// Imports every `.csv`, `.ndjson` and `.jsonl` file directly under `dir`.
/// Files are read in name order.
pub fn import_dir(dir: &Path) -> Result<Vec<Lap>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    let mut laps = vec![];
    for p in paths {
        match p.extension().and_then(|e| e.to_str()) {
            Some("csv") => laps.extend(import_csv(&p)?),
            Some("ndjson") | Some("jsonl") => laps.extend(import_ndjson(&p)?),
            _ => {}
        }
    }
    Ok(laps)
}

fn new_lap(r: &CsvRow) -> Lap {
    let key = TrackKey { game: r.game.clone(), car: r.car.clone(), track: r.track.clone() };
    Lap::new(&key, r.lap_number)
}

#[derive(Serialize, Deserialize)]
struct CsvRow {
    game: String,
    car: String,
    track: String,
    lap_number: u32,
    t_ms: f64,
    distance_m: f64,
    speed_ms: f64,
    throttle: f64,
    brake: f64,
    gear: i8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_lap(number: u32) -> Lap {
        let key = TrackKey { game: "iRacing".into(), car: "gt3".into(), track: "spa".into() };
        let mut lap = Lap::new(&key, number);
        lap.points = (0..20)
            .map(|i| TelemetryPoint {
                t_ms: i as f64 * 100.0,
                distance_m: i as f64 * 5.0,
                speed_ms: 50.0,
                throttle: 1.0,
                brake: 0.0,
                gear: 4,
            })
            .collect();
        lap.total_time_ms = 1900;
        lap
    }

    #[test]
    fn test_csv_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laps.csv");
        let laps = vec![create_test_lap(1), create_test_lap(2)];
        export_csv(&laps, &path).unwrap();

        let back = import_csv(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].meta.lap_number, 2);
        assert_eq!(back[0].points, laps[0].points);
        assert_eq!(back[0].total_time_ms, 1900);
        assert_eq!(back[0].meta.track, "spa");
    }

    #[test]
    fn test_ndjson_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laps.ndjson");
        export_ndjson(&[create_test_lap(3)], &path).unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f).unwrap();

        let back = import_ndjson(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].meta.lap_number, 3);
    }

    #[test]
    fn test_import_dir_reads_known_extensions() {
        let dir = tempfile::tempdir().unwrap();
        export_csv(&[create_test_lap(1)], &dir.path().join("a.csv")).unwrap();
        export_ndjson(&[create_test_lap(2)], &dir.path().join("b.ndjson")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let laps = import_dir(dir.path()).unwrap();
        let numbers: Vec<u32> = laps.iter().map(|l| l.meta.lap_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }
}
