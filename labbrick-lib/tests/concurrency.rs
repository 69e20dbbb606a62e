//! Parallel use of the registry from several tasks

mod common;

use common::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handles_run_in_parallel() {
    let (lab, bus) = registry();
    let lab = Arc::new(lab);
    for id in [LDA102, LDA602, LDA602Q] {
        lab.init_device(id).await.unwrap();
    }

    let mut tasks = Vec::new();
    for (id, step) in [(LDA102, 1), (LDA602, 2), (LDA602Q, 3)] {
        let lab = Arc::clone(&lab);
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                let value = (i * step) % 200;
                lab.set_attenuation(id, value).await.unwrap();
                assert_eq!(lab.attenuation(id).await.unwrap(), value);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(bus.registers(LDA102_SERIAL).unwrap().levels, vec![49 * 5]);
    assert_eq!(bus.registers(LDA602_SERIAL).unwrap().levels, vec![98 * 5]);
    assert_eq!(bus.registers(LDA602Q_SERIAL).unwrap().levels[0], 147 * 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_handle_serializes_callers() {
    let (lab, _bus) = opened(LDA602Q).await;
    let lab = Arc::new(lab);

    // Every task owns one channel; its last write must be the one that sticks
    let mut tasks = Vec::new();
    for channel in 1..=4u8 {
        let lab = Arc::clone(&lab);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                lab.set_attenuation_hr_on_channel(LDA602Q, channel, channel as i32 * 100 + i)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let levels = lab.snapshot(LDA602Q).await.unwrap().levels;
    assert_eq!(levels, vec![124, 224, 324, 424]);
}
