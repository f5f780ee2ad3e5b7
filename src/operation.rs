use std::{
    fmt,
    fs,
    path::Path,
};
use sha2::{
    Digest, Sha256
};

use crate::{
    error::Result,
    program::ProgramId,
    values::NadaValues,
};

// what a payment is quoted for; a receipt is only good for the operation it was quoted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    StoreProgram {
        program_name: String,
        // sha256 of the compiled artifact
        program_digest: [u8; 32],
    },

    StoreValues {
        value_names: Vec<String>,
        ttl_days: u32,
    },

    Compute {
        program_id: ProgramId,
        value_names: Vec<String>,
    },
}

impl Operation {
    pub fn store_program(program_name: &str, program_path: &Path) -> Result<Self> {
        Ok(Self::store_program_bytes(program_name, &fs::read(program_path)?))
    }

    pub fn store_program_bytes(program_name: &str, mir: &[u8]) -> Self {
        Operation::StoreProgram {
            program_name: program_name.to_string(),
            program_digest: Sha256::digest(mir).into(),
        }
    }

    pub fn store_values(values: &NadaValues, ttl_days: u32) -> Self {
        Operation::StoreValues {
            value_names: values.names().map(str::to_string).collect(),
            ttl_days,
        }
    }

    pub fn compute(program_id: &ProgramId, values: &NadaValues) -> Self {
        Operation::Compute {
            program_id: program_id.clone(),
            value_names: values.names().map(str::to_string).collect(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::StoreProgram { .. } => "store_program",
            Operation::StoreValues { .. } => "store_values",
            Operation::Compute { .. } => "compute",
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        // length prefixes keep adjacent fields from running into each other
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        };
        match self {
            Operation::StoreProgram { program_name, program_digest } => {
                field(program_name.as_bytes());
                field(program_digest);
            },
            Operation::StoreValues { value_names, ttl_days } => {
                for name in value_names {
                    field(name.as_bytes());
                }
                field(&ttl_days.to_be_bytes());
            },
            Operation::Compute { program_id, value_names } => {
                field(program_id.to_string().as_bytes());
                for name in value_names {
                    field(name.as_bytes());
                }
            },
        }
        hasher.finalize().into()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::StoreProgram { program_name, .. } => write!(f, "store_program(`{program_name}`)"),
            Operation::StoreValues { value_names, ttl_days } => {
                write!(f, "store_values({value_names:?}, ttl_days: {ttl_days})")
            },
            Operation::Compute { program_id, value_names } => {
                write!(f, "compute(`{program_id}`, {value_names:?})")
            },
        }
    }
}
