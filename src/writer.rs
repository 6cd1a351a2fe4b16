use crate::message::SampleMessage;
use anyhow::{Context, Result};
use pcd_rs::{DataKind, WriterInit};
use rayon::prelude::*;
use tracing::debug;

/// Writes incoming samples to .pcd files until the channel is closed.
pub fn run_writer(sample_rx: flume::Receiver<SampleMessage>) -> Result<()> {
    sample_rx
        .into_iter()
        .par_bridge()
        .try_for_each(process_msg)?;
    Ok(())
}

fn process_msg(msg: SampleMessage) -> Result<()> {
    let SampleMessage {
        batch_id,
        sample_id,
        points,
        output_path,
    } = msg;

    let mut writer = WriterInit {
        width: points.len() as u64,
        height: 1,
        viewpoint: Default::default(),
        data_kind: DataKind::Binary,
        schema: None,
    }
    .create(&output_path)
    .with_context(|| format!("unable to create '{}'", output_path.display()))?;

    for point in &points {
        writer.push(point)?;
    }

    writer.finish()?;
    debug!(
        "Wrote sample {sample_id} of batch {batch_id} to {}",
        output_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabeledPoint;
    use nalgebra::Point3;
    use pcd_rs::Reader;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn written_samples_can_be_read_back() {
        let out_dir = TempDir::new().unwrap();

        let points = vec![
            LabeledPoint::new(&Point3::new(0.0, 1.0, 10.0), 0.25, 1, &[0.1; 7]),
            LabeledPoint::new(&Point3::new(5.0, 1.0, 30.0), -0.5, 0, &[0.0; 7]),
            LabeledPoint::new(&Point3::new(1.2, 1.0, 10.0), 0.0, -1, &[0.0; 7]),
        ];
        let output_path = out_dir.path().join("000007.pcd");

        let (tx, rx) = flume::bounded(1);
        let handle = thread::spawn(move || run_writer(rx));
        tx.send(SampleMessage {
            batch_id: 0,
            sample_id: "000007".to_string(),
            points: points.clone(),
            output_path: output_path.clone(),
        })
        .unwrap();
        drop(tx);
        handle.join().unwrap().unwrap();

        let read_back: Vec<LabeledPoint> = Reader::open(&output_path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(read_back, points);
    }
}
