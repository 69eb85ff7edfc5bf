//! End-to-end install attempts against real packages and forked installers.

mod common;

use std::fs;
use std::time::{Duration, Instant};

use recovery_installer::install::{Background, HeadlessUi, RecoveryUi, UiEvent};
use recovery_installer::{InstallOutcome, InstallRequest, InstallResult, PackageInstaller};
use serial_test::serial;

use common::{INSTALLER_ENTRY, Workspace, open_fd_count, shell_installer, signed_package};

fn install(ws: &Workspace, package: &str) -> (InstallOutcome, HeadlessUi) {
    let mut ui = HeadlessUi::new();
    let outcome = PackageInstaller::new(ws.config.clone(), &mut ui)
        .install_package(&InstallRequest::new(package));
    (outcome, ui)
}

fn install_script(ws: &Workspace, body: &str) -> (InstallOutcome, HeadlessUi) {
    let package = ws.package_with_installer(&shell_installer(body));
    install(ws, package.to_str().unwrap())
}

#[test]
#[serial]
fn successful_install_reports_progress_and_wipe_cache() {
    let ws = Workspace::new();
    let (outcome, ui) = install_script(
        &ws,
        "say progress 0.5 0\n\
         say ui_print hello from installer\n\
         say set_progress 0.3\n\
         say wipe_cache\n\
         exit 0",
    );

    assert_eq!(outcome.result, InstallResult::Success);
    assert!(outcome.wipe_cache);
    assert!(outcome.modified_storage);

    let text = ui.text();
    assert!(text.starts_with(
        "Finding update package...\nOpening update package...\nVerifying update package...\nInstalling update...\n"
    ));
    assert!(text.contains("hello from installer"));

    let set = ui
        .events()
        .iter()
        .find_map(|e| match e {
            UiEvent::SetProgress(f) => Some(*f),
            _ => None,
        })
        .unwrap();
    assert!((set - 0.3625).abs() < 1e-6);

    // Reboot was blocked while the installer ran and restored afterwards.
    let reboot: Vec<bool> = ui
        .events()
        .iter()
        .filter_map(|e| match e {
            UiEvent::EnableReboot(on) => Some(*on),
            _ => None,
        })
        .collect();
    assert_eq!(reboot, vec![false, true]);
    assert!(ui.reboot_enabled());
    assert!(!ui.events().contains(&UiEvent::Background(Background::Error)));

    let package = ws.path().join("update.zip");
    assert_eq!(ws.install_log(), format!("{}\n1\n", package.display()));
    assert!(!ws.config.installer_path.exists());
}

#[test]
#[serial]
fn installer_receives_argument_contract() {
    let ws = Workspace::new();
    let (outcome, ui) = install_script(
        &ws,
        "[ $# -eq 3 ] || exit 10\n\
         case \"$2\" in ''|*[!0-9]*) exit 11;; esac\n\
         say ui_print api=$1 package=$3\n\
         exit 0",
    );

    assert_eq!(outcome.result, InstallResult::Success);
    let package = ws.path().join("update.zip");
    assert!(
        ui.text()
            .contains(&format!("api={} package={}", recovery_installer::RECOVERY_API_VERSION, package.display()))
    );
}

#[test]
#[serial]
fn device_marked_package_reaches_installer_unchanged() {
    let ws = Workspace::new();
    let package = ws.package_with_installer(&shell_installer("say ui_print got=$3\nexit 0"));
    let marked = format!("@{}", package.display());

    let (outcome, ui) = install(&ws, &marked);
    assert_eq!(outcome.result, InstallResult::Success);
    assert!(ui.text().contains(&format!("got={marked}")));
    assert_eq!(ws.install_log(), format!("{marked}\n1\n"));
}

#[test]
#[serial]
fn nonzero_exit_is_error() {
    let ws = Workspace::new();
    let (outcome, ui) = install_script(&ws, "say ui_print failing\nexit 3");

    assert_eq!(outcome.result, InstallResult::Error);
    assert_eq!(ui.events().last(), Some(&UiEvent::Background(Background::Error)));
    assert!(ws.install_log().ends_with("\n0\n"));
    assert!(!ws.config.installer_path.exists());
}

#[test]
#[serial]
fn killed_installer_is_error() {
    let ws = Workspace::new();
    let (outcome, _) = install_script(&ws, "kill -9 $$");
    assert_eq!(outcome.result, InstallResult::Error);
}

#[test]
#[serial]
fn unrunnable_installer_is_error() {
    let ws = Workspace::new();
    let package = ws.package_with_installer(&[0x00, 0x01, 0x02, 0x03]);
    let (outcome, _) = install(&ws, package.to_str().unwrap());
    assert_eq!(outcome.result, InstallResult::Error);
}

#[test]
#[serial]
fn unknown_and_malformed_commands_do_not_fail_the_install() {
    let ws = Workspace::new();
    let (outcome, ui) = install_script(
        &ws,
        "say firmware radio PACKAGE:radio.img\n\
         say progress lots soon\n\
         say set_progress\n\
         say ui_print\n\
         say ui_print still fine\n\
         exit 0",
    );

    assert_eq!(outcome.result, InstallResult::Success);
    assert!(!outcome.wipe_cache);
    assert!(ui.text().contains("\nstill fine"));
}

#[test]
#[serial]
fn missing_installer_entry_is_corrupt() {
    let ws = Workspace::new();
    let bytes = signed_package(common::TRUSTED_SEED, &[("system/build.prop", &b"ro.build.id=TEST"[..])]);
    let package = ws.write_package("no-installer.zip", &bytes);

    let (outcome, ui) = install(&ws, package.to_str().unwrap());
    assert_eq!(outcome.result, InstallResult::Corrupt);
    assert!(!ws.config.installer_path.exists());
    assert!(ui.reboot_enabled());
}

#[test]
#[serial]
fn package_from_untrusted_signer_is_corrupt_and_never_runs() {
    let ws = Workspace::new();
    let marker = ws.path().join("ran");
    let installer = shell_installer(&format!("touch {}\nexit 0", marker.display()));
    let bytes = signed_package(42, &[(INSTALLER_ENTRY, &installer[..])]);
    let package = ws.write_package("untrusted.zip", &bytes);

    let (outcome, ui) = install(&ws, package.to_str().unwrap());
    assert_eq!(outcome.result, InstallResult::Corrupt);
    assert!(!marker.exists());
    assert!(!ws.config.installer_path.exists());
    assert!(!ui.text().contains("Installing update..."));
}

#[test]
#[serial]
fn tampered_package_is_corrupt() {
    let ws = Workspace::new();
    let package = ws.package_with_installer(&shell_installer("exit 0"));
    let mut bytes = fs::read(&package).unwrap();
    bytes[10] ^= 0x40;
    fs::write(&package, bytes).unwrap();

    let (outcome, _) = install(&ws, package.to_str().unwrap());
    assert_eq!(outcome.result, InstallResult::Corrupt);
}

#[test]
#[serial]
fn repeated_attempts_agree() {
    let ws = Workspace::new();
    let package = ws.package_with_installer(&shell_installer("say progress 1.0 0\nexit 0"));

    let (first, _) = install(&ws, package.to_str().unwrap());
    let (second, _) = install(&ws, package.to_str().unwrap());
    assert_eq!(first, second);
    assert_eq!(first.result, InstallResult::Success);
}

#[test]
#[serial]
fn exit_is_noticed_while_pipe_stays_open() {
    let ws = Workspace::new();
    // The background sleeper inherits the pipe, so EOF never arrives in time.
    let started = Instant::now();
    let (outcome, _) = install_script(&ws, "sleep 5 &\nsay ui_print started helper\nexit 0");

    assert_eq!(outcome.result, InstallResult::Success);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
#[serial]
fn descriptors_are_released_on_every_path() {
    let ws = Workspace::new();
    let good = ws.package_with_installer(&shell_installer("say ui_print ok\nexit 0"));
    let bad = ws.write_package("garbage.zip", b"this is not a signed update package at all");

    // Warm-up so lazily opened process-wide descriptors are already counted.
    install(&ws, good.to_str().unwrap());
    let before = open_fd_count();

    install(&ws, good.to_str().unwrap());
    install(&ws, bad.to_str().unwrap());
    install_script(&ws, "exit 1");

    assert_eq!(open_fd_count(), before);
}
