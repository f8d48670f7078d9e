use timedkv_common::rpc::ReturnCode;
use timedkv_common::TimedKvError;

#[test]
fn error_display() {
    let err = TimedKvError::NoRecord("foo".to_string());
    assert_eq!(err.to_string(), "no record: foo");
}

#[test]
fn error_equality() {
    let a = TimedKvError::Logic("cas mismatch".to_string());
    let b = TimedKvError::Logic("cas mismatch".to_string());
    let c = TimedKvError::Logic("other".to_string());
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn return_code_mapping() {
    assert_eq!(ReturnCode::from(&TimedKvError::NoRecord("k".into())).http_status(), 450);
    assert_eq!(ReturnCode::from(&TimedKvError::Duplicate("k".into())).http_status(), 450);
    assert_eq!(ReturnCode::from(&TimedKvError::Logic("bad".into())).http_status(), 450);
    assert_eq!(ReturnCode::from(&TimedKvError::Invalid("bad arg".into())).http_status(), 400);
    assert_eq!(ReturnCode::from(&TimedKvError::NoImpl("proc".into())).http_status(), 501);
    assert_eq!(ReturnCode::from(&TimedKvError::Internal("boom".into())).http_status(), 500);
    assert_eq!(ReturnCode::from(&TimedKvError::Network("timeout".into())).http_status(), 500);
    assert_eq!(ReturnCode::from(&TimedKvError::System("oom".into())).http_status(), 500);
}

#[test]
fn error_tag_is_stable() {
    assert_eq!(TimedKvError::NoRecord("k".into()).tag(), "no_record");
    assert_eq!(TimedKvError::Duplicate("k".into()).tag(), "duplicate");
}
