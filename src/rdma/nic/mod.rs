//! RDMA hardware resource discovery.

mod port;

pub use self::port::*;
use crate::error::Error;

/// Pick a device out of the enumerated device names.
///
/// With no wanted name, the first enumerated device is chosen. Otherwise the
/// name must match exactly. Return the index of the chosen device.
pub fn select_device<S: AsRef<str>>(names: &[S], wanted: Option<&str>) -> Result<usize, Error> {
    if names.is_empty() {
        return Err(Error::NoDevice);
    }

    match wanted {
        None => Ok(0),
        Some(wanted) => names
            .iter()
            .position(|name| name.as_ref() == wanted)
            .ok_or_else(|| Error::DeviceNotFound(wanted.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_device_by_default() {
        let names = ["mlx5_0", "mlx5_1"];
        assert_eq!(select_device(&names, None).unwrap(), 0);
        assert_eq!(select_device(&names, Some("mlx5_1")).unwrap(), 1);
    }

    #[test]
    fn name_must_match_exactly() {
        let names = ["mlx5_0", "mlx5_10"];
        assert!(matches!(
            select_device(&names, Some("mlx5_1")),
            Err(Error::DeviceNotFound(name)) if name == "mlx5_1"
        ));
        assert!(matches!(
            select_device::<&str>(&[], None),
            Err(Error::NoDevice)
        ));
    }
}
