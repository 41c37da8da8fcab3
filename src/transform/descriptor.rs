//! Just enough of the JVM descriptor grammar to know how many stack slots a call consumes and
//! produces.

use super::TransformError;

/// The slot sizes of a method's parameters and return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<u16>,
    pub ret: u16,
}

impl MethodDescriptor {
    pub fn parse(desc: &str) -> Result<MethodDescriptor, TransformError> {
        let bad = || TransformError::BadDescriptor(desc.to_string());

        let rest = desc.strip_prefix('(').ok_or_else(bad)?;
        let (params, ret) = rest.split_once(')').ok_or_else(bad)?;

        let mut sizes = vec![];
        let mut remaining = params;

        while !remaining.is_empty() {
            let (size, tail) = next_type(remaining).ok_or_else(bad)?;
            sizes.push(size);
            remaining = tail;
        }

        let ret = match ret {
            "V" => 0,
            ret => match next_type(ret) {
                Some((size, "")) => size,
                _ => return Err(bad()),
            },
        };

        Ok(MethodDescriptor { params: sizes, ret })
    }

    /// Total slots taken by the parameters.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().sum()
    }
}

/// The slot size of a field descriptor.
pub fn field_size(desc: &str) -> Result<u16, TransformError> {
    match next_type(desc) {
        Some((size, "")) => Ok(size),
        _ => Err(TransformError::BadDescriptor(desc.to_string())),
    }
}

/// Splits one field type off the front of `desc`, returning its slot size and the rest.
fn next_type(desc: &str) -> Option<(u16, &str)> {
    let first = desc.chars().next()?;

    match first {
        'J' | 'D' => Some((2, &desc[1..])),
        'Z' | 'B' | 'C' | 'S' | 'I' | 'F' => Some((1, &desc[1..])),

        'L' => {
            let end = desc.find(';')?;
            Some((1, &desc[end + 1..]))
        }

        '[' => {
            let element = desc.trim_start_matches('[');

            // Arrays are references no matter what they hold.
            let (_, rest) = next_type(element)?;
            Some((1, rest))
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hook_descriptors() {
        let desc = MethodDescriptor::parse("(Ljava/lang/String;Ljava/lang/Class;)V").unwrap();
        assert_eq!(desc.params, vec![1, 1]);
        assert_eq!(desc.ret, 0);
    }

    #[test]
    fn wide_and_array_types() {
        let desc = MethodDescriptor::parse("(J[[DI[Ljava/lang/Object;)D").unwrap();
        assert_eq!(desc.params, vec![2, 1, 1, 1]);
        assert_eq!(desc.param_slots(), 5);
        assert_eq!(desc.ret, 2);
    }

    #[test]
    fn malformed_descriptors() {
        for desc in ["", "V", "(I", "(Q)V", "(Ljava/lang/String)V", "()VV"] {
            assert!(MethodDescriptor::parse(desc).is_err(), "{desc}");
        }

        assert_eq!(field_size("Lnet/fabricmc/loader/api/metadata/ModMetadata;").unwrap(), 1);
        assert!(field_size("II").is_err());
    }
}
