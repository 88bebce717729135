use std::time::Duration;

use super::*;

#[test]
fn connection_loss_and_timeout_are_retryable() {
    let loss: Error = ConnectionError::ConnectionLoss.into();
    let timeout: Error = ConnectionError::Timeout {
        operation: "get_data".to_string(),
        duration: Duration::from_millis(10),
    }
    .into();

    assert!(loss.is_retryable());
    assert!(loss.is_transient());
    assert!(timeout.is_retryable());
    assert!(timeout.is_transient());
}

#[test]
fn exhausted_retries_are_transient_but_not_retried_again() {
    let e: Error = ConnectionError::RetryExhausted {
        operation: "delete".to_string(),
        attempts: 4,
        last_error: "connection lost".to_string(),
    }
    .into();

    assert!(e.is_transient());
    assert!(!e.is_retryable());
}

#[test]
fn logical_errors_are_never_transient() {
    let errors: Vec<Error> = vec![
        CoordinationError::NoNode("/a".into()).into(),
        CoordinationError::NodeExists("/a".into()).into(),
        CoordinationError::NoAuth("/a".into()).into(),
        ConnectionError::SessionExpired(7).into(),
        Error::SessionClosed,
    ];

    for e in errors {
        assert!(!e.is_transient(), "{e} must not be transient");
        assert!(!e.is_retryable(), "{e} must not be retryable");
    }
}

#[test]
fn not_found_is_detected() {
    let e: Error = CoordinationError::NoNode("/missing".into()).into();
    assert!(e.is_not_found());
    assert!(!e.is_node_exists());
    assert_eq!(e.to_string(), "Node does not exist: /missing");
}

#[test]
fn decode_errors_convert_into_serialization_errors() {
    // field 1, length 5, one byte of payload
    let truncated: &[u8] = &[0x0a, 0x05, b'a'];
    let decode = <String as prost::Message>::decode(truncated).unwrap_err();
    let e: Error = decode.into();
    assert!(matches!(e, Error::Serialization(SerializationError::ProstDecode(_))));
}
