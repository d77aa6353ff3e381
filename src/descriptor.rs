//! Helpers over JVM method descriptors such as `(ILjava/lang/String;)V`.

/// Argument type descriptors, or `None` when the descriptor is malformed.
pub(crate) fn argument_types(desc: &str) -> Option<Vec<&str>> {
    let rest = desc.strip_prefix('(')?;
    let end = rest.find(')')?;
    let mut params = &rest[..end];
    let mut types = Vec::new();
    while !params.is_empty() {
        let len = field_type_len(params)?;
        types.push(&params[..len]);
        params = &params[len..];
    }
    Some(types)
}

pub(crate) fn return_type(desc: &str) -> Option<&str> {
    let end = desc.find(')')?;
    let ret = &desc[end + 1..];
    if ret.is_empty() { None } else { Some(ret) }
}

/// Local slots taken by a value of the given type.
pub(crate) fn type_size(ty: &str) -> u16 {
    match ty {
        "J" | "D" => 2,
        "V" => 0,
        _ => 1,
    }
}

fn field_type_len(params: &str) -> Option<usize> {
    let bytes = params.as_bytes();
    let mut index = 0;
    while bytes.get(index) == Some(&b'[') {
        index += 1;
    }
    match bytes.get(index)? {
        b'L' => {
            let semicolon = params[index..].find(';')?;
            Some(index + semicolon + 1)
        }
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(index + 1),
        _ => None,
    }
}
