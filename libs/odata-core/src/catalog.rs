//! Error catalog: one static definition per error kind.
//!
//! The host HTTP layer maps these to protocol responses; the core only
//! attaches the code, a title and a suggested status.

/// Static error definition from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
}

pub const LEX_ERROR: ErrDef = ErrDef {
    status: 400,
    title: "Malformed Query Option",
    code: "odata.lex.invalid_character",
};

pub const SYNTAX_ERROR: ErrDef = ErrDef {
    status: 400,
    title: "Invalid Query Syntax",
    code: "odata.syntax.unexpected_token",
};

pub const UNKNOWN_PROPERTY: ErrDef = ErrDef {
    status: 400,
    title: "Unknown Property",
    code: "odata.bind.unknown_property",
};

pub const UNKNOWN_FUNCTION: ErrDef = ErrDef {
    status: 400,
    title: "Unknown Function",
    code: "odata.bind.unknown_function",
};

pub const FUNCTION_SIGNATURE_MISMATCH: ErrDef = ErrDef {
    status: 400,
    title: "Function Signature Mismatch",
    code: "odata.bind.function_signature_mismatch",
};

pub const AMBIGUOUS_OVERLOAD: ErrDef = ErrDef {
    status: 400,
    title: "Ambiguous Overload",
    code: "odata.bind.ambiguous_overload",
};

pub const TYPE_MISMATCH: ErrDef = ErrDef {
    status: 400,
    title: "Type Mismatch",
    code: "odata.bind.type_mismatch",
};

pub const INVALID_CAST: ErrDef = ErrDef {
    status: 400,
    title: "Invalid Cast",
    code: "odata.bind.invalid_cast",
};

pub const UNKNOWN_TYPE: ErrDef = ErrDef {
    status: 400,
    title: "Unknown Type",
    code: "odata.bind.unknown_type",
};

pub const INVALID_PATH: ErrDef = ErrDef {
    status: 400,
    title: "Invalid Path",
    code: "odata.bind.invalid_path",
};

pub const INVALID_PAGING: ErrDef = ErrDef {
    status: 400,
    title: "Invalid Paging",
    code: "odata.translate.invalid_paging",
};

pub const CONFLICTING_PATHS: ErrDef = ErrDef {
    status: 400,
    title: "Conflicting Paths",
    code: "odata.translate.conflicting_paths",
};

pub const LIMIT_EXCEEDED: ErrDef = ErrDef {
    status: 400,
    title: "Query Too Complex",
    code: "odata.limit.exceeded",
};

pub const INVALID_OPTION: ErrDef = ErrDef {
    status: 400,
    title: "Invalid Query Option",
    code: "odata.option.invalid",
};

pub const CANCELLED: ErrDef = ErrDef {
    status: 499,
    title: "Request Cancelled",
    code: "odata.cancelled",
};

/// Every catalog entry, in declaration order.
pub const ALL: &[&ErrDef] = &[
    &LEX_ERROR,
    &SYNTAX_ERROR,
    &UNKNOWN_PROPERTY,
    &UNKNOWN_FUNCTION,
    &FUNCTION_SIGNATURE_MISMATCH,
    &AMBIGUOUS_OVERLOAD,
    &TYPE_MISMATCH,
    &INVALID_CAST,
    &UNKNOWN_TYPE,
    &INVALID_PATH,
    &INVALID_PAGING,
    &CONFLICTING_PATHS,
    &LIMIT_EXCEEDED,
    &INVALID_OPTION,
    &CANCELLED,
];

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let mut seen = HashSet::new();
        for def in ALL {
            assert!(seen.insert(def.code), "duplicate code {}", def.code);
        }
    }

    #[test]
    fn codes_share_prefix() {
        assert!(ALL.iter().all(|d| d.code.starts_with("odata.")));
    }
}
