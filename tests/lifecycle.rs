use std::cell::RefCell;
use std::rc::Rc;

use kurasync::backend::{AudioBackend, ClockState, OfflineBackend, OfflineRenderer};
use kurasync::error::{LifecycleError, PlatformError};
use kurasync::runtime::{ExprRuntime, SynthRuntime};
use kurasync::{AudioGraphController, EngineConfig, Error, LifecycleState, StatusKind, UserGesture};

type Log = Rc<RefCell<Vec<(StatusKind, String)>>>;

fn engine() -> (AudioGraphController<OfflineBackend>, OfflineRenderer, Log) {
    let (backend, renderer) = OfflineBackend::new(44_100, 2);
    let log: Log = Rc::default();
    let sink = log.clone();
    let engine = AudioGraphController::new(EngineConfig::default(), backend)
        .with_observer(move |kind: StatusKind, detail: &str| sink.borrow_mut().push((kind, detail.to_string())));
    (engine, renderer, log)
}

fn is_invalid_state(result: kurasync::Result<()>) -> bool {
    matches!(result, Err(Error::Lifecycle(LifecycleError::InvalidState { .. })))
}

#[test]
fn init_reaches_running() {
    let (mut engine, mut renderer, log) = engine();
    assert_eq!(engine.state(), LifecycleState::Uninitialized);

    engine.init(UserGesture::new(), 2).unwrap();
    assert_eq!(engine.state(), LifecycleState::Running);
    assert_eq!(engine.backend().clock_state(), ClockState::Running);

    renderer.render_blocks(1);
    engine.pump();
    assert!(log
        .borrow()
        .contains(&(StatusKind::StateChange, "processor ready".to_string())));
}

#[test]
fn operations_before_init_fail_without_changing_state() {
    let (mut engine, _renderer, _log) = engine();

    assert!(is_invalid_state(engine.play()));
    assert!(is_invalid_state(engine.stop()));
    assert!(is_invalid_state(engine.stop_and_release()));
    assert!(is_invalid_state(engine.submit_program("", "1")));
    assert!(is_invalid_state(engine.adjust_parameter("gain", 1.0)));
    assert!(is_invalid_state(engine.send_clock_phase(0.0, 0)));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);
}

#[test]
fn play_stop_toggle_scenario() {
    let (mut engine, mut renderer, log) = engine();

    engine.init(UserGesture::new(), 2).unwrap();
    engine.submit_program("x=1", "y=x+1").unwrap();
    renderer.render_blocks(1);

    engine.stop().unwrap();
    assert_eq!(engine.state(), LifecycleState::Suspended);
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.0));

    engine.play().unwrap();
    assert_eq!(engine.state(), LifecycleState::Running);

    // play while running suspends and reports failure
    let toggled = engine.play();
    assert!(matches!(toggled, Err(Error::Lifecycle(LifecycleError::AlreadyRunning))));
    assert_eq!(engine.state(), LifecycleState::Suspended);

    engine.play().unwrap();
    assert_eq!(engine.state(), LifecycleState::Running);

    // the program survived the toggles
    assert!(renderer.render_blocks(2).iter().all(|&s| s == 2.0));
    engine.pump();
    assert!(log
        .borrow()
        .contains(&(StatusKind::StateChange, "program 1 active".to_string())));
}

#[test]
fn stop_only_from_running() {
    let (mut engine, _renderer, _log) = engine();
    engine.init(UserGesture::new(), 1).unwrap();
    engine.stop().unwrap();

    assert!(is_invalid_state(engine.stop()));
    assert_eq!(engine.state(), LifecycleState::Suspended);
}

#[test]
fn init_twice_is_rejected() {
    let (mut engine, _renderer, _log) = engine();
    engine.init(UserGesture::new(), 1).unwrap();
    assert!(matches!(
        engine.init(UserGesture::new(), 1),
        Err(Error::Lifecycle(LifecycleError::InvalidState { operation: "init", .. }))
    ));
    assert_eq!(engine.state(), LifecycleState::Running);
}

#[test]
fn release_tears_down_and_allows_reinit() {
    let (mut engine, mut renderer, _log) = engine();
    engine.init(UserGesture::new(), 1).unwrap();
    engine.submit_program("", "0.5").unwrap();
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.5));

    engine.stop_and_release().unwrap();
    assert_eq!(engine.state(), LifecycleState::Released);
    assert_eq!(engine.backend().clock_state(), ClockState::Closed);

    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.0));
    assert!(!renderer.has_graph());
    assert!(is_invalid_state(engine.submit_program("", "1")));
    assert!(is_invalid_state(engine.play()));

    engine.init(UserGesture::new(), 1).unwrap();
    assert_eq!(engine.state(), LifecycleState::Running);
    assert!(renderer.has_graph());

    // fresh graph, fresh program slot
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.0));
}

#[test]
fn release_from_suspended() {
    let (mut engine, _renderer, _log) = engine();
    engine.init(UserGesture::new(), 1).unwrap();
    engine.stop().unwrap();
    engine.stop_and_release().unwrap();
    assert_eq!(engine.state(), LifecycleState::Released);
    assert!(is_invalid_state(engine.stop_and_release()));
}

#[test]
fn unsupported_platform_falls_back_to_uninitialized() {
    let (backend, _renderer) = OfflineBackend::unsupported();
    let mut engine = AudioGraphController::new(EngineConfig::default(), backend);

    let result = engine.init(UserGesture::new(), 1);
    assert!(matches!(result, Err(Error::Platform(PlatformError::Unsupported(_)))));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);

    // can be retried
    assert!(matches!(engine.init(UserGesture::new(), 1), Err(Error::Platform(_))));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);
}

#[test]
fn unknown_processor_is_a_module_load_failure() {
    let (backend, mut renderer) = OfflineBackend::new(48_000, 1);
    let config = EngineConfig::default().with_processor("granular");
    let mut engine = AudioGraphController::new(config, backend);

    let result = engine.init(UserGesture::new(), 1);
    assert!(matches!(result, Err(Error::Platform(PlatformError::ModuleLoad(ref name))) if name == "granular"));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);

    engine.register_processor("granular", || Box::new(ExprRuntime::new()) as Box<dyn SynthRuntime>);
    engine.init(UserGesture::new(), 1).unwrap();
    engine.submit_program("", "0.25").unwrap();
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.25));
}

#[test]
fn stale_setup_completion_is_discarded() {
    let (mut engine, mut renderer, _log) = engine();

    let ticket = engine.begin_init(UserGesture::new(), 2).unwrap();
    assert_eq!(engine.state(), LifecycleState::Initializing);
    engine.open_render_context(&ticket).unwrap();

    // release while the platform is still setting up
    engine.stop_and_release().unwrap();
    assert_eq!(engine.state(), LifecycleState::Initializing);

    let result = engine.complete_init(ticket);
    assert!(matches!(
        result,
        Err(Error::Lifecycle(LifecycleError::StaleSetup { ticket: 1, current: 2 }))
    ));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);
    assert_eq!(engine.backend().clock_state(), ClockState::Closed);
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.0));

    engine.init(UserGesture::new(), 2).unwrap();
    assert_eq!(engine.state(), LifecycleState::Running);
}

#[test]
fn stale_ticket_before_open_is_discarded() {
    let (mut engine, _renderer, _log) = engine();

    let ticket = engine.begin_init(UserGesture::new(), 1).unwrap();
    engine.stop_and_release().unwrap();

    assert!(matches!(
        engine.open_render_context(&ticket),
        Err(Error::Lifecycle(LifecycleError::StaleSetup { .. }))
    ));
    assert_eq!(engine.state(), LifecycleState::Uninitialized);
}

#[test]
fn parameter_adjustments() {
    let (mut engine, mut renderer, log) = engine();
    engine.init(UserGesture::new(), 1).unwrap();
    engine.submit_program("", "gain").unwrap();

    assert!(matches!(
        engine.adjust_parameter("cutoff", 1.0),
        Err(Error::UnknownParameter(ref name)) if name == "cutoff"
    ));

    engine.more("gain").unwrap();
    engine.more("gain").unwrap();
    engine.less("gain").unwrap();
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 1.5));

    // bounded by the parameter's own domain [0, 10]
    engine.adjust_parameter("gain", -100.0).unwrap();
    assert!(renderer.render_blocks(1).iter().all(|&s| s == 0.0));

    engine.pump();
    assert!(log.borrow().iter().all(|(kind, _)| *kind != StatusKind::PortError));
}
