mod common;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use illuminate::{Color, DpcDirection, DriverError, Illuminate, IlluminateConfig, Precision};

use common::{test_config, BoardHandle, BoardSettings, FakeBoard};

fn open_with(settings: BoardSettings, config: IlluminateConfig) -> (Illuminate, BoardHandle) {
    let (board, handle) = FakeBoard::new(settings);
    let light = Illuminate::with_transport(board, config).unwrap();
    (light, handle)
}

fn open() -> (Illuminate, BoardHandle) {
    open_with(BoardSettings::default(), test_config())
}

fn set(items: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
    items.into_iter().collect()
}

fn led_commands(handle: &BoardHandle) -> Vec<String> {
    handle
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("l."))
        .collect()
}

#[test]
fn open_drives_board_into_known_state() {
    let (light, handle) = open();
    assert_eq!(
        handle.commands(),
        vec!["reboot", "version", "pp", "ac.1", "au.1", "sc.1.1.1", "x"]
    );
    assert_eq!(light.version(), "1.20.2");
    assert_eq!(light.serial_number(), "F00042");
    assert_eq!(light.part_number(), "1001");
    assert_eq!(light.led_count(), 609);
    assert_eq!(light.color(), Color::gray(1.0));
    assert!(light.autoclear());
    assert!(light.autoupdate().unwrap());
    assert!(light.led().is_empty());
    assert!(light.led_state().is_dark());
}

#[test]
fn reboot_can_be_skipped() {
    let config = IlluminateConfig {
        reboot_on_open: false,
        ..test_config()
    };
    let (_light, handle) = open_with(BoardSettings::default(), config);
    assert_eq!(handle.commands()[0], "version");
}

#[test]
fn led_state_follows_color_and_autoclear() {
    let (mut light, _handle) = open();

    light.set_color((2.0, 3.0, 4.0)).unwrap();
    light.set_led(vec![1, 2, 3]).unwrap();
    assert_eq!(light.led_state().get(1), Some(Color::new(2.0, 3.0, 4.0)));
    assert_eq!(light.led_state().get(0), Some(Color::OFF));

    light.clear().unwrap();
    assert!(light.led_state().is_dark());

    light.set_color((9.0, 8.0, 1.0)).unwrap();
    light.set_led(vec![5, 10, 30]).unwrap();
    for (led, color) in light.led_state().data().iter().enumerate() {
        let expected = if [5, 10, 30].contains(&led) {
            Color::new(9.0, 8.0, 1.0)
        } else {
            Color::OFF
        };
        assert_eq!(*color, expected, "LED {led}");
    }
    assert_eq!(light.led(), &set([5, 10, 30]));
}

#[test]
fn leds_accumulate_without_autoclear() {
    let (mut light, handle) = open();
    light.set_autoclear(false).unwrap();
    light.turn_on_led(vec![1, 2, 3]).unwrap();
    light.turn_on_led(vec![3, 4]).unwrap();
    assert_eq!(light.led(), &set([1, 2, 3, 4]));
    assert_eq!(led_commands(&handle), vec!["l.1.2.3", "l.3.4"]);
}

#[test]
fn long_led_list_is_chunked_and_mirrored_whole() {
    let (mut light, handle) = open();
    handle.forget_commands();

    light.turn_on_led(0..609).unwrap();

    let chunks = led_commands(&handle);
    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.len() < 64));
    assert_eq!(light.led(), &set(0..609));
    assert!(light.led_state().data().iter().all(|c| *c == Color::gray(1.0)));

    let commands = handle.commands();
    assert_eq!(&commands[..3], &["au.0", "x", "ac.0"]);
    assert_eq!(&commands[commands.len() - 3..], &["ac.1", "au.1", "u"]);
    assert!(light.autoclear());
    assert!(light.autoupdate().unwrap());
}

#[test]
fn chunked_list_adds_to_lit_leds_without_autoclear() {
    let (mut light, handle) = open();
    light.set_autoclear(false).unwrap();
    light.turn_on_led(600).unwrap();
    handle.forget_commands();

    light.turn_on_led(0..300).unwrap();

    assert!(!handle.commands().contains(&"x".to_string()));
    let mut expected = set(0..300);
    expected.insert(600);
    assert_eq!(light.led(), &expected);
    assert!(!light.autoclear());
}

#[test]
fn failed_chunk_restores_update_flags() {
    let settings = BoardSettings {
        fail_led_command: Some(2),
        ..BoardSettings::default()
    };
    let (mut light, handle) = open_with(settings, test_config());
    handle.forget_commands();

    let err = light.turn_on_led(0..609).unwrap_err();
    assert!(matches!(err, DriverError::Device(_)));

    assert!(light.autoclear());
    assert!(light.autoupdate().unwrap());
    let commands = handle.commands();
    assert_eq!(&commands[commands.len() - 2..], &["ac.1", "au.1"]);
    assert_eq!(handle.count("u"), 0);
    assert!(light.led().is_empty());
}

#[test]
fn failed_restore_still_reports_the_chunk_error() {
    let settings = BoardSettings {
        fail_led_command: Some(2),
        fail_autoclear_after_led_failure: true,
        ..BoardSettings::default()
    };
    let (mut light, handle) = open_with(settings, test_config());
    handle.forget_commands();

    match light.turn_on_led(0..609) {
        Err(DriverError::Device(text)) => assert!(text.contains("injected failure")),
        other => panic!("unexpected {other:?}"),
    }
    // Autoupdate is still restored after the autoclear restore failed.
    assert_eq!(handle.commands().last().map(String::as_str), Some("au.1"));
    assert_eq!(handle.count("u"), 0);
    assert!(light.led().is_empty());
}

#[test]
fn old_firmware_has_no_autoupdate() {
    let settings = BoardSettings {
        version: "1.11.3".into(),
        ..BoardSettings::default()
    };
    let (mut light, handle) = open_with(settings, test_config());
    assert_eq!(handle.count("au.1"), 0);

    assert!(matches!(light.autoupdate(), Err(DriverError::Unsupported(_))));
    assert!(matches!(light.set_autoupdate(true), Err(DriverError::Unsupported(_))));

    handle.forget_commands();
    light.turn_on_led(0..609).unwrap();
    let commands = handle.commands();
    assert!(commands.iter().all(|c| !c.starts_with("au") && c != "u"));
    assert_eq!(light.led(), &set(0..609));
}

#[test]
fn brightness_needs_a_gray_color() {
    let (mut light, _handle) = open();
    light.set_color((1.0, 2.0, 3.0)).unwrap();
    assert!(matches!(light.brightness(), Err(DriverError::AmbiguousBrightness(_))));

    light.set_brightness(5.0).unwrap();
    assert_eq!(light.brightness().unwrap(), 5.0);
    assert_eq!(light.color(), Color::gray(5.0));
}

#[test]
fn out_of_range_color_is_clamped() {
    let (mut light, handle) = open();
    light.set_color(300.0).unwrap();
    assert_eq!(handle.commands().last().map(String::as_str), Some("sc.255.255.255"));
    assert_eq!(light.color(), Color::gray(255.0));
}

#[test]
fn float_precision_scales_to_interface_depth() {
    let settings = BoardSettings {
        interface_bit_depth: 16,
        ..BoardSettings::default()
    };
    let config = IlluminateConfig {
        precision: Precision::Float,
        ..test_config()
    };
    let (mut light, handle) = open_with(settings, config);
    assert_eq!(light.color_maximum_value(), 1.0);

    light.set_color(0.5).unwrap();
    assert_eq!(
        handle.commands().last().map(String::as_str),
        Some("sc.32768.32768.32768")
    );
    assert_relative_eq!(light.color().red, 32768.0 / 65535.0);
}

#[test]
fn precision_finer_than_interface_is_rejected() {
    let config = IlluminateConfig {
        precision: Precision::Bits(12),
        ..test_config()
    };
    let (board, _handle) = FakeBoard::new(BoardSettings::default());
    let err = Illuminate::with_transport(board, config).unwrap_err();
    assert!(matches!(err, DriverError::Validation(_)));
}

#[test]
fn clear_twice_stays_dark() {
    let (mut light, handle) = open();
    light.turn_on_led(vec![1, 7]).unwrap();
    handle.forget_commands();
    for _ in 0..2 {
        light.clear().unwrap();
        assert!(light.led().is_empty());
        assert!(light.led_state().is_dark());
    }
    assert_eq!(handle.commands(), vec!["x", "x"]);
}

#[test]
fn fill_lights_everything() {
    let (mut light, _handle) = open();
    light.fill_array().unwrap();
    assert_eq!(light.led().len(), 609);
}

#[test]
fn empty_selection_clears_under_autoclear() {
    let (mut light, handle) = open();
    light.turn_on_led(4).unwrap();
    handle.forget_commands();

    light.turn_on_led(None::<usize>).unwrap();
    assert_eq!(handle.commands(), vec!["x"]);
    assert!(light.led().is_empty());

    light.set_autoclear(false).unwrap();
    handle.forget_commands();
    light.turn_on_led(Vec::<usize>::new()).unwrap();
    assert!(handle.commands().is_empty());
}

#[test]
fn unknown_led_is_rejected_before_sending() {
    let (mut light, handle) = open();
    handle.forget_commands();
    let err = light.turn_on_led(vec![1, 609]).unwrap_err();
    assert!(matches!(err, DriverError::Validation(_)));
    assert!(handle.commands().is_empty());
}

#[test]
fn garbled_parameters_are_retried() {
    let settings = BoardSettings {
        garbled_parameters: 2,
        ..BoardSettings::default()
    };
    let (light, handle) = open_with(settings, test_config());
    assert_eq!(handle.count("pp"), 3);
    assert_eq!(light.device_name(), "fake-illuminate");
}

#[test]
fn parameters_give_up_after_bounded_attempts() {
    let settings = BoardSettings {
        garbled_parameters: 100,
        ..BoardSettings::default()
    };
    let config = IlluminateConfig {
        json_attempts: 3,
        ..test_config()
    };
    let (board, handle) = FakeBoard::new(settings);
    let err = Illuminate::with_transport(board, config).unwrap_err();
    assert!(matches!(err, DriverError::Decode { attempts: 3, .. }));
    assert_eq!(handle.count("pp"), 3);
}

#[test]
fn device_replies_become_errors() {
    let (mut light, _handle) = open();
    match light.ask("bogus.1") {
        Err(DriverError::Device(text)) => assert!(text.contains("unknown command")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(light.ask("future"), Err(DriverError::Unsupported(_))));

    let value = light.ask("ssl.12").unwrap();
    assert_eq!(value.map(|n| n.as_f64()), Some(12.0));
}

#[test]
fn json_device_error_is_not_retried() {
    let settings = BoardSettings {
        missing_led_positions: true,
        ..BoardSettings::default()
    };
    let (mut light, handle) = open_with(settings, test_config());
    match light.led_positions() {
        Err(DriverError::Device(text)) => assert!(text.contains("no LED positions")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(handle.count("pledpos"), 1);
}

#[test]
fn max_brightness_respects_power_budget() {
    let (mut light, _handle) = open();
    let color = light.find_max_brightness(Some(655), Some(Color::gray(1.0))).unwrap();
    assert_relative_eq!(color.red, 51.90839694656488, epsilon = 1e-9);
    assert!(color.is_gray());

    // The current hue is used when no ratio is given.
    light.set_color((0.0, 0.0, 10.0)).unwrap();
    let color = light.find_max_brightness(Some(1), None).unwrap();
    assert_eq!(color, Color::new(0.0, 0.0, 255.0));
}

#[test]
fn infrared_channels_map_onto_rgb() {
    let (mut light, handle) = open();
    light.set_color_940_ir(20.0).unwrap();
    assert_eq!(light.color(), Color::new(20.0, 20.0, 0.0));
    assert_eq!(light.color_940_ir(), 20.0);
    assert_eq!(handle.commands().last().map(String::as_str), Some("sc.20.20.0"));

    light.set_color_850_ir(10.0).unwrap();
    assert_eq!(light.color(), Color::new(0.0, 0.0, 10.0));
    assert_eq!(light.color_850_ir(), 10.0);
}

#[test]
fn patterns_use_fixed_point_and_leave_mirror_alone() {
    let (mut light, handle) = open();
    light.turn_on_led(vec![1, 2]).unwrap();
    handle.forget_commands();

    light.set_numerical_aperture(0.25).unwrap();
    light.annulus(0.2, 0.4).unwrap();
    light.dpc(DpcDirection::Top).unwrap();
    light.half_annulus(DpcDirection::Left, 0.1, 0.3).unwrap();
    light.color_dpc(Some(Color::new(1.0, 2.0, 3.0))).unwrap();

    assert_eq!(
        handle.commands(),
        vec!["na.25", "an.20.40", "dpc.t", "ha.l.10.30", "cdpc.1.2.3"]
    );
    assert_eq!(light.numerical_aperture(), Some(0.25));
    assert_eq!(light.led(), &set([1, 2]));

    assert!(matches!(light.annulus(0.5, 0.2), Err(DriverError::Validation(_))));
}

#[test]
fn sequence_values_respect_bit_depth() {
    let (mut light, handle) = open();
    assert!(matches!(light.set_sequence_bit_depth(4), Err(DriverError::Validation(_))));
    handle.forget_commands();

    light.set_sequence_bit_depth(1).unwrap();
    light.set_sequence_length(2).unwrap();
    light.set_sequence_value(&[(3, [1, 0, 1]), (4, [0, 1, 0])]).unwrap();
    assert_eq!(handle.commands(), vec!["ssbd.1", "ssl.2", "ssv.3.1.0.1.4.0.1.0"]);

    let err = light.set_sequence_value(&[(3, [2, 0, 0])]).unwrap_err();
    assert!(matches!(err, DriverError::Validation(_)));
}

#[test]
fn sequences_run_with_millisecond_delays() {
    let (mut light, handle) = open();
    light.set_sequence_length(3).unwrap();
    handle.forget_commands();

    let started = Instant::now();
    let report = light.run_sequence(Duration::from_millis(10), &[0]).unwrap();
    assert_eq!(report, vec!["Finished sequence"]);
    light.run_sequence_fast(Duration::from_millis(10), &[0]).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(handle.commands(), vec!["rseq.10.0", "rseqf.10.0"]);
}

#[test]
fn delay_outlasting_read_timeout_keeps_replies_aligned() {
    let (mut light, handle) = open();
    let started = Instant::now();
    light.delay(Duration::from_millis(40)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(handle.commands().last().map(String::as_str), Some("delay.40"));
    assert_eq!(light.help().unwrap(), vec!["Help", "l.[led#].[led#]"]);
}

#[test]
fn uv_leds_are_addressed_apart_from_the_mirror() {
    let (mut light, handle) = open();
    assert_eq!(light.all_leds(), 0..609);
    light.turn_on_led(vec![5]).unwrap();
    light.turn_on_uv_led(0).unwrap();
    assert_eq!(handle.commands().last().map(String::as_str), Some("uv.0"));
    assert_eq!(light.led(), &set([5]));
}

#[test]
fn led_positions_are_loaded_once() {
    let (mut light, handle) = open();
    assert_eq!(light.led_positions().unwrap().len(), 2);
    let second = light.led_positions().unwrap();
    assert_eq!(second[1].x_mm, 4.0);
    assert_eq!(handle.count("pledpos"), 1);
}

#[test]
fn help_text_is_cleaned() {
    let (mut light, _handle) = open();
    assert_eq!(light.help().unwrap(), vec!["Help", "l.[led#].[led#]"]);
}

#[test]
fn closed_session_refuses_commands() {
    let (mut light, handle) = open();
    light.close().unwrap();
    assert_eq!(handle.commands().last().map(String::as_str), Some("x"));
    assert!(!light.is_open());

    light.close().unwrap();
    assert!(matches!(light.clear(), Err(DriverError::NotReady(_))));
}

#[test]
fn reboot_resets_the_mirror() {
    let (mut light, handle) = open();
    light.set_autoclear(false).unwrap();
    light.turn_on_led(vec![3]).unwrap();
    handle.forget_commands();

    light.reboot().unwrap();
    assert_eq!(handle.commands(), vec!["reboot", "ac.1", "au.1", "sc.1.1.1", "x"]);
    assert!(light.autoclear());
    assert!(light.led().is_empty());
}

#[test]
fn impossible_precision_fails_before_any_traffic() {
    let config = IlluminateConfig {
        precision: Precision::Bits(20),
        ..test_config()
    };
    let (board, handle) = FakeBoard::new(BoardSettings::default());
    let err = Illuminate::with_transport(board, config).unwrap_err();
    assert!(matches!(err, DriverError::Validation(_)));
    assert!(handle.commands().is_empty());
}
