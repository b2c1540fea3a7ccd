use crate::domain::OrderType;
use crate::error::CoreError;

/// Port must be in [1024, 49151] when explicitly set by the operator (§6).
pub fn validate_port(port: u16, set_by_user: bool) -> Result<(), CoreError> {
    if set_by_user && !(1024..=49151).contains(&port) {
        return Err(CoreError::validation(
            "port",
            format!("invalid 'port' value: {port}"),
        ));
    }
    Ok(())
}

pub fn validate_max_concurrent(value: u32) -> Result<(), CoreError> {
    if value == 0 || value > 100 {
        return Err(CoreError::validation(
            "max-concurrent",
            format!("invalid 'max-concurrent' value: {value}"),
        ));
    }
    Ok(())
}

pub fn validate_worker_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::validation(
            "worker-name",
            "'worker-name' value cannot be empty",
        ));
    }
    Ok(())
}

/// Parses and validates the comma-joined `--order-types` flag (§6).
pub fn parse_order_types(raw: &str) -> Result<Vec<OrderType>, CoreError> {
    let types: Result<Vec<OrderType>, CoreError> =
        raw.split(',').map(|s| s.trim().parse()).collect();
    let types = types?;
    if types.is_empty() {
        return Err(CoreError::validation(
            "order-types",
            "invalid 'order-types' value: value is empty",
        ));
    }
    Ok(types)
}

pub fn validate_heartbeat_interval(value: u32) -> Result<(), CoreError> {
    if value == 0 || value > 50 {
        return Err(CoreError::validation(
            "heartbeat-interval",
            format!("invalid 'heartbeat-interval' value: {value}"),
        ));
    }
    Ok(())
}

pub fn validate_prefetch(value: u16) -> Result<(), CoreError> {
    if value == 0 || value > 10 {
        return Err(CoreError::validation(
            "prefetch",
            format!("invalid 'prefetch' value: {value}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_bounds() {
        assert!(validate_port(3000, true).is_ok());
        assert!(validate_port(80, true).is_err());
        assert!(validate_port(80, false).is_ok());
        assert!(validate_port(49152, true).is_err());
    }

    #[test]
    fn order_types_parses_csv() {
        let types = parse_order_types("takeout,dine_in,delivery").unwrap();
        assert_eq!(types.len(), 3);
    }

    #[test]
    fn order_types_rejects_unknown() {
        assert!(parse_order_types("sushi").is_err());
    }

    #[test]
    fn heartbeat_bounds() {
        assert!(validate_heartbeat_interval(30).is_ok());
        assert!(validate_heartbeat_interval(0).is_err());
        assert!(validate_heartbeat_interval(51).is_err());
    }

    #[test]
    fn prefetch_bounds() {
        assert!(validate_prefetch(1).is_ok());
        assert!(validate_prefetch(0).is_err());
        assert!(validate_prefetch(11).is_err());
    }
}
