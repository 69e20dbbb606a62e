//! Ramp, timing, profile and persistence operations

mod common;

use common::*;

#[tokio::test]
async fn ramp_settings_round_trip() {
    let (lab, bus) = opened(LDA602).await;

    lab.set_ramp_start(LDA602, 8).await.unwrap();
    lab.set_ramp_end_hr(LDA602, 1001).await.unwrap();
    lab.set_ramp_step_hr(LDA602, 2).await.unwrap();
    lab.set_ramp_step_two(LDA602, 4).await.unwrap();

    assert_eq!(lab.ramp_start(LDA602).await.unwrap(), 8);
    assert_eq!(lab.ramp_start_hr(LDA602).await.unwrap(), 40);
    assert_eq!(lab.ramp_end_hr(LDA602).await.unwrap(), 1001);
    assert_eq!(lab.ramp_end(LDA602).await.unwrap(), 200);
    assert_eq!(lab.ramp_step_hr(LDA602).await.unwrap(), 2);
    assert_eq!(lab.ramp_step_two(LDA602).await.unwrap(), 4);
    assert_eq!(lab.ramp_step_two_hr(LDA602).await.unwrap(), 20);

    let registers = bus.registers(LDA602_SERIAL).unwrap();
    assert_eq!(registers.ramp.start, 40);
    assert_eq!(registers.ramp.end, 1001);
    assert_eq!(registers.ramp.step_two, 20);

    // Steps below the model's minimum are refused
    assert!(matches!(
        lab.set_ramp_step_hr(LDA602, 1).await,
        Err(LabBrickError::OutOfRange { quantity: "ramp step", .. })
    ));
    assert_eq!(lab.ramp_step_hr(LDA602).await.unwrap(), 2);
}

#[tokio::test]
async fn reported_minimum_step_is_accepted() {
    let (lab, _bus) = registry();

    for (id, resolution) in [
        (LDA102, Resolution::Standard),
        (LDA602, Resolution::Standard),
        (LDA602, Resolution::High),
        (LDA602Q, Resolution::Standard),
        (LPS802, Resolution::Standard),
    ] {
        if lab.handle_state(id).await.unwrap().0 != HandleState::Open {
            lab.init_device(id).await.unwrap();
        }
        let step = match (lab.family(id).unwrap(), resolution) {
            (Family::PhaseShifter, _) => lab.min_phase_step(id).await.unwrap(),
            (_, Resolution::High) => lab.min_atten_step_hr(id).await.unwrap(),
            _ => lab.min_atten_step(id).await.unwrap(),
        };
        assert!(step > 0, "device {id} {resolution}");

        let (result, result_two, below) = match resolution {
            Resolution::High => (
                lab.set_ramp_step_hr(id, step).await,
                lab.set_ramp_step_two_hr(id, step).await,
                lab.set_ramp_step_hr(id, step - 1).await,
            ),
            Resolution::Standard => (
                lab.set_ramp_step(id, step).await,
                lab.set_ramp_step_two(id, step).await,
                lab.set_ramp_step(id, step - 1).await,
            ),
        };
        result.unwrap();
        result_two.unwrap();
        match below {
            Err(LabBrickError::OutOfRange { value, min, .. }) => {
                assert_eq!(value, step as i64 - 1);
                assert_eq!(min, step as i64, "device {id} {resolution}");
            }
            other => panic!("device {id}: unexpected {other:?}"),
        }
    }

    // 0.1 dB is one quarter dB through the standard accessors
    assert_eq!(lab.min_atten_step(LDA602).await.unwrap(), 1);
    assert_eq!(lab.ramp_step_hr(LDA602).await.unwrap(), 2);
}

#[tokio::test]
async fn timing_round_trip_and_bounds() {
    let (lab, _bus) = opened(LDA102).await;

    lab.set_dwell_time(LDA102, 50).await.unwrap();
    lab.set_dwell_time_two(LDA102, 100).await.unwrap();
    lab.set_idle_time(LDA102, 0).await.unwrap();
    lab.set_hold_time(LDA102, 2_000).await.unwrap();

    assert_eq!(lab.dwell_time(LDA102).await.unwrap(), 50);
    assert_eq!(lab.dwell_time_two(LDA102).await.unwrap(), 100);
    assert_eq!(lab.idle_time(LDA102).await.unwrap(), 0);
    assert_eq!(lab.hold_time(LDA102).await.unwrap(), 2_000);

    assert!(matches!(
        lab.set_dwell_time(LDA102, 0).await,
        Err(LabBrickError::OutOfRange { min: 1, .. })
    ));
    assert!(matches!(
        lab.set_idle_time(LDA102, -1).await,
        Err(LabBrickError::OutOfRange { .. })
    ));
    assert_eq!(lab.dwell_time(LDA102).await.unwrap(), 50);
}

#[tokio::test]
async fn ramp_flags_and_completion() {
    let (lab, bus) = opened(LDA602).await;

    lab.set_ramp_direction(LDA602, false).await.unwrap();
    lab.set_ramp_mode(LDA602, true).await.unwrap();
    lab.set_ramp_bidirectional(LDA602, true).await.unwrap();

    let registers = bus.registers(LDA602_SERIAL).unwrap();
    assert!(!registers.ramp.up);
    assert!(registers.ramp.repeat);
    assert!(registers.ramp.bidirectional);

    lab.start_ramp(LDA602, true).await.unwrap();
    let status = lab.device_status(LDA602).await.unwrap();
    assert!(status.ramp_active());
    assert!(!status.ramp_up());
    assert!(status.ramp_repeat());
    assert!(status.ramp_bidirectional());

    bus.finish_sweep(LDA602_SERIAL);
    assert!(!lab.device_status(LDA602).await.unwrap().ramp_active());
    assert_eq!(lab.snapshot(LDA602).await.unwrap().ramp.state.to_string(), "Idle");

    lab.start_ramp(LDA602, true).await.unwrap();
    lab.start_ramp(LDA602, false).await.unwrap();
    assert!(!lab.device_status(LDA602).await.unwrap().ramp_active());
}

#[tokio::test]
async fn profile_elements_round_trip() {
    let (lab, bus) = opened(LDA602).await;

    let values = [0, 40, 80, 121];
    lab.set_profile_count(LDA602, values.len() as i32).await.unwrap();
    for (index, value) in values.iter().enumerate() {
        lab.set_profile_element(LDA602, index as u16, *value).await.unwrap();
    }
    for (index, value) in values.iter().enumerate() {
        assert_eq!(lab.profile_element(LDA602, index as u16).await.unwrap(), *value);
    }
    assert_eq!(lab.profile_element_hr(LDA602, 3).await.unwrap(), 605);
    assert_eq!(&bus.registers(LDA602_SERIAL).unwrap().profile.elements[..4], &[0, 200, 400, 605]);

    lab.set_profile_element_hr(LDA602, 1, 33).await.unwrap();
    assert_eq!(lab.profile_element(LDA602, 1).await.unwrap(), 7);

    assert!(matches!(
        lab.set_profile_element(LDA602, 4, 10).await,
        Err(LabBrickError::OutOfRange {
            quantity: "profile index",
            value: 4,
            ..
        })
    ));
    assert!(matches!(
        lab.profile_element(LDA602, 4).await,
        Err(LabBrickError::OutOfRange { .. })
    ));
    assert!(matches!(
        lab.set_profile_element(LDA602, 0, 481).await,
        Err(LabBrickError::OutOfRange { quantity: "attenuation", .. })
    ));
    assert_eq!(lab.profile_element(LDA602, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn profile_count_is_bounded_by_model_capacity() {
    let (lab, _bus) = registry();
    lab.init_device(LDA102).await.unwrap();
    lab.init_device(LDA602).await.unwrap();

    assert_eq!(lab.profile_count(LDA102).await.unwrap(), 0);
    assert!(matches!(
        lab.set_profile_count(LDA102, 101).await,
        Err(LabBrickError::OutOfRange { max: 100, .. })
    ));
    lab.set_profile_count(LDA602, 1000).await.unwrap();
    assert_eq!(lab.profile_count(LDA602).await.unwrap(), 1000);
    lab.set_profile_element(LDA602, 999, 4).await.unwrap();
    assert_eq!(lab.profile_element(LDA602, 999).await.unwrap(), 4);

    // Nothing is addressable while the count is zero
    assert!(matches!(
        lab.set_profile_element(LDA102, 0, 4).await,
        Err(LabBrickError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn running_profile_reports_index_and_activity() {
    let (lab, bus) = opened(LDA602).await;

    lab.set_profile_count(LDA602, 3).await.unwrap();
    lab.set_profile_dwell_time(LDA602, 20).await.unwrap();
    lab.set_profile_idle_time(LDA602, 5).await.unwrap();
    assert_eq!(lab.profile_dwell_time(LDA602).await.unwrap(), 20);
    assert_eq!(lab.profile_idle_time(LDA602).await.unwrap(), 5);

    lab.start_profile(LDA602, ProfileMode::Repeat).await.unwrap();
    assert!(lab.device_status(LDA602).await.unwrap().profile_active());
    assert_eq!(lab.profile_index(LDA602).await.unwrap(), 0);

    bus.step_profile(LDA602_SERIAL);
    bus.step_profile(LDA602_SERIAL);
    assert_eq!(lab.profile_index(LDA602).await.unwrap(), 2);
    bus.step_profile(LDA602_SERIAL);
    assert_eq!(lab.profile_index(LDA602).await.unwrap(), 0);

    lab.start_profile(LDA602, ProfileMode::Off).await.unwrap();
    assert!(!lab.device_status(LDA602).await.unwrap().profile_active());
}

#[tokio::test]
async fn saved_settings_survive_a_power_cycle() {
    let (lab, bus) = opened(LDA602).await;

    lab.set_attenuation(LDA602, 40).await.unwrap();
    lab.set_working_frequency(LDA602, 10_000).await.unwrap();
    lab.save_settings(LDA602).await.unwrap();
    assert_eq!(bus.saved_settings(LDA602_SERIAL).unwrap().levels, vec![200]);

    lab.set_attenuation(LDA602, 80).await.unwrap();
    bus.power_cycle(LDA602_SERIAL);

    assert_eq!(lab.attenuation(LDA602).await.unwrap(), 40);
    assert_eq!(lab.working_frequency(LDA602).await.unwrap(), 10_000);
}

#[tokio::test]
async fn snapshot_serializes_for_tooling() {
    let (lab, _bus) = opened(LDA602).await;
    lab.set_attenuation(LDA602, 40).await.unwrap();
    lab.set_ramp_mode(LDA602, true).await.unwrap();

    let snapshot = lab.snapshot(LDA602).await.unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["levels"][0], 200);
    assert_eq!(json["ramp"]["repeat"], true);
    assert_eq!(json["profile"]["state"], "Idle");
}
