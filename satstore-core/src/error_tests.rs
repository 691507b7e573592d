/*!
Tests for error display, conversion and classification.
*/

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, SatStoreError};
    use satstore_retry::RetryableError;
    use std::io;

    #[test]
    fn test_error_display() {
        let error = SatStoreError::naming_template("unknown variable 'tile'");
        assert_eq!(
            error.to_string(),
            "Naming template error: unknown variable 'tile'"
        );

        let error = SatStoreError::configuration("remote bucket missing");
        assert_eq!(error.to_string(), "Configuration error: remote bucket missing");

        let error = SatStoreError::upload("base/S2MPC/x.tif", "timed out", true);
        assert_eq!(
            error.to_string(),
            "Upload of 'base/S2MPC/x.tif' failed: timed out"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = SatStoreError::from(io_error);

        match error {
            SatStoreError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SatStoreError::naming_template("x").kind(), ErrorKind::NamingTemplate);
        assert_eq!(SatStoreError::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(SatStoreError::write("x").kind(), ErrorKind::Write);
        assert_eq!(SatStoreError::upload("k", "x", false).kind(), ErrorKind::Write);
        assert_eq!(SatStoreError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            SatStoreError::from(io::Error::new(io::ErrorKind::Other, "x")).kind(),
            ErrorKind::Write
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(SatStoreError::upload("k", "dispatch failure", true).is_transient());
        assert!(!SatStoreError::upload("k", "access denied", false).is_transient());
        assert!(SatStoreError::from(io::Error::new(io::ErrorKind::TimedOut, "slow")).is_transient());
        assert!(!SatStoreError::configuration("no bucket").is_transient());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NamingTemplate.to_string(), "naming_template");
        assert_eq!(ErrorKind::Write.to_string(), "write");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SatStoreError>();
        assert_sync::<SatStoreError>();
    }
}
