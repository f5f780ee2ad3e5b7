use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};
use log::info;
use serde::{
    Serialize, Deserialize
};

use crate::{
    error::{
        Error,
        Result,
    },
    keys::{
        PartyId,
        UserId,
    },
    values::{
        NadaType,
        NadaValue,
        NadaValues,
    },
};

/*
programs are described in toml and compiled into `{name}.nada.bin` artifacts:

    name = "my_telemetry_program"
    parties = ["Party1"]

    [[inputs]]
    name = "secret_value"
    party = "Party1"
    type = "SecretInteger"

    [[outputs]]
    name = "result"
    party = "Party1"
    expr = "secret_value * operation_time"

an artifact is bincode of (magic, version, program); expressions are kept in
their textual form so loading one always goes through the parser
*/

const MIR_MAGIC: [u8; 4] = *b"NADA";
const MIR_VERSION: u32 = 1;

pub const MIR_EXTENSION: &str = "nada.bin";

// deepest expression tree, and deepest parenthesis or negation nesting, accepted
pub const MAX_EXPR_DEPTH: usize = 64;

// `{dir}/{program_name}.nada.bin`
pub fn mir_path(dir: &Path, program_name: &str) -> PathBuf {
    dir.join(format!("{program_name}.{MIR_EXTENSION}"))
}

/// A stored program as addressed by compute calls: `{user_id}/{program_name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramId {
    pub owner: UserId,
    pub name: String,
}

impl ProgramId {
    pub fn new(owner: UserId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for ProgramId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, name) = s.split_once('/')
            .ok_or_else(|| Error::ProgramFormat(format!("`{s}` is not of the form `user_id/program_name`")))?;
        let owner = owner.parse::<UserId>()
            .map_err(|e| Error::ProgramFormat(format!("bad owner in program id `{s}`: {e}")))?;
        if name.is_empty() {
            return Err(Error::ProgramFormat(format!("empty program name in `{s}`")));
        }
        Ok(Self::new(owner, name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Expr {
    Input(String),
    Literal(i64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    // height of the tree, walked without recursion
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((expr, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            match expr {
                Expr::Input(_) | Expr::Literal(_) => {},
                Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) | Expr::Mul(lhs, rhs) => {
                    pending.push((lhs, depth + 1));
                    pending.push((rhs, depth + 1));
                },
            }
        }
        deepest
    }

    fn collect_inputs<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Input(name) => {
                names.insert(name);
            },
            Expr::Literal(_) => {},
            Expr::Add(lhs, rhs) | Expr::Sub(lhs, rhs) | Expr::Mul(lhs, rhs) => {
                lhs.collect_inputs(names);
                rhs.collect_inputs(names);
            },
        }
    }

    fn eval(&self, inputs: &NadaValues) -> Result<i128> {
        let overflow = || Error::Compute(format!("arithmetic overflow in `{self}`"));
        match self {
            Expr::Input(name) => {
                let value = inputs.get(name)
                    .ok_or_else(|| Error::Compute(format!("missing input `{name}`")))?;
                value.as_integer()
                    .ok_or_else(|| Error::Compute(format!("input `{name}` is not an integer")))
            },
            Expr::Literal(v) => Ok(i128::from(*v)),
            Expr::Add(lhs, rhs) => lhs.eval(inputs)?
                .checked_add(rhs.eval(inputs)?)
                .ok_or_else(overflow),
            Expr::Sub(lhs, rhs) => lhs.eval(inputs)?
                .checked_sub(rhs.eval(inputs)?)
                .ok_or_else(overflow),
            Expr::Mul(lhs, rhs) => lhs.eval(inputs)?
                .checked_mul(rhs.eval(inputs)?)
                .ok_or_else(overflow),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Input(name) => write!(f, "{name}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Add(lhs, rhs) => write!(f, "({lhs} + {rhs})"),
            Expr::Sub(lhs, rhs) => write!(f, "({lhs} - {rhs})"),
            Expr::Mul(lhs, rhs) => write!(f, "({lhs} * {rhs})"),
        }
    }
}

impl FromStr for Expr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parser = ExprParser {
            tokens: tokenize(s)?,
            pos: 0,
            nesting: 0,
        };
        let (expr, _) = parser.expr()?;
        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(Error::ProgramFormat(format!("unexpected `{token:?}` in `{s}`")));
        }
        Ok(expr)
    }
}

impl From<Expr> for String {
    fn from(expr: Expr) -> Self {
        expr.to_string()
    }
}

impl TryFrom<String> for Expr {
    type Error = Error;

    fn try_from(text: String) -> Result<Self> {
        text.parse()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(i64),
    Plus,
    Minus,
    Star,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            chars.next();
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::ProgramFormat(format!("unexpected `{c}` at {start} in `{src}`")));
        }
        // a run of word characters: either a literal or an input name
        let mut end = start;
        while let Some(&(i, w)) = chars.peek() {
            if !(w.is_ascii_alphanumeric() || w == '_') {
                break;
            }
            end = i + w.len_utf8();
            chars.next();
        }
        let word = &src[start..end];
        if c.is_ascii_digit() {
            let n = word.parse::<i64>()
                .map_err(|e| Error::ProgramFormat(format!("bad literal `{word}`: {e}")))?;
            tokens.push(Token::Number(n));
        } else {
            tokens.push(Token::Ident(word.to_string()));
        }
    }
    Ok(tokens)
}

// expr   := term (('+' | '-') term)*
// term   := factor ('*' factor)*
// factor := number | ident | '-' factor | '(' expr ')'
//
// every rule yields the expression along with its depth
struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    // open parentheses and negations around the current position
    nesting: usize,
}

type Parsed = (Expr, usize);

// join two operands, refusing trees deeper than `MAX_EXPR_DEPTH`
fn combine(op: fn(Box<Expr>, Box<Expr>) -> Expr, lhs: Parsed, rhs: Parsed) -> Result<Parsed> {
    let depth = 1 + lhs.1.max(rhs.1);
    if depth > MAX_EXPR_DEPTH {
        return Err(Error::ProgramFormat(format!(
            "expression is nested deeper than {MAX_EXPR_DEPTH} levels"
        )));
    }
    Ok((op(Box::new(lhs.0), Box::new(rhs.0)), depth))
}

impl ExprParser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Parsed> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = combine(Expr::Add, lhs, rhs)?;
                },
                Some(Token::Minus) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = combine(Expr::Sub, lhs, rhs)?;
                },
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Parsed> {
        let mut lhs = self.factor()?;
        while let Some(Token::Star) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = combine(Expr::Mul, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Parsed> {
        match self.next() {
            Some(Token::Number(n)) => Ok((Expr::Literal(n), 1)),
            Some(Token::Ident(name)) => Ok((Expr::Input(name), 1)),
            Some(Token::Minus) => {
                self.descend()?;
                let operand = self.factor()?;
                self.nesting -= 1;
                combine(Expr::Sub, (Expr::Literal(0), 1), operand)
            },
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.nesting -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(Error::ProgramFormat(format!("expected `)`, found `{other:?}`"))),
                }
            },
            other => Err(Error::ProgramFormat(format!("expected an operand, found `{other:?}`"))),
        }
    }

    fn descend(&mut self) -> Result<()> {
        if self.nesting >= MAX_EXPR_DEPTH {
            return Err(Error::ProgramFormat(format!(
                "expression is nested deeper than {MAX_EXPR_DEPTH} levels"
            )));
        }
        self.nesting += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    pub party: String,
    #[serde(rename = "type")]
    pub ty: NadaType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub party: String,
    pub expr: Expr,
}

// output as written in the program description, before the expression is parsed
#[derive(Debug, Deserialize)]
struct OutputSource {
    name: String,
    party: String,
    expr: String,
}

#[derive(Debug, Deserialize)]
struct ProgramSource {
    name: String,
    parties: Vec<String>,
    #[serde(default)]
    inputs: Vec<InputDecl>,
    outputs: Vec<OutputSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub parties: Vec<String>,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<Output>,
}

impl Program {
    pub fn from_source(text: &str) -> Result<Self> {
        let source: ProgramSource = toml::from_str(text)
            .map_err(|e| Error::ProgramFormat(e.to_string()))?;
        let outputs = source.outputs
            .into_iter()
            .map(|o| -> Result<Output> {
                Ok(Output {
                    expr: o.expr.parse()?,
                    name: o.name,
                    party: o.party,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let program = Program {
            name: source.name,
            parties: source.parties,
            inputs: source.inputs,
            outputs: outputs,
        };
        program.validate()?;
        Ok(program)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::ProgramFormat(format!("{}: {msg}", self.name)));
        if self.name.is_empty() {
            return Err(Error::ProgramFormat("program name is empty".to_string()));
        }
        let parties: BTreeSet<_> = self.parties.iter().map(String::as_str).collect();
        if parties.len() != self.parties.len() {
            return invalid("duplicate party".to_string());
        }
        let mut inputs = BTreeSet::new();
        for input in &self.inputs {
            if !parties.contains(input.party.as_str()) {
                return invalid(format!("input `{}` belongs to unknown party `{}`", input.name, input.party));
            }
            if !inputs.insert(input.name.as_str()) {
                return invalid(format!("duplicate input `{}`", input.name));
            }
        }
        if self.outputs.is_empty() {
            return invalid("no outputs".to_string());
        }
        let mut outputs = BTreeSet::new();
        for output in &self.outputs {
            if !parties.contains(output.party.as_str()) {
                return invalid(format!("output `{}` belongs to unknown party `{}`", output.name, output.party));
            }
            if !outputs.insert(output.name.as_str()) {
                return invalid(format!("duplicate output `{}`", output.name));
            }
            if output.expr.depth() > MAX_EXPR_DEPTH {
                return invalid(format!(
                    "output `{}` is nested deeper than {MAX_EXPR_DEPTH} levels",
                    output.name
                ));
            }
            let mut referenced = BTreeSet::new();
            output.expr.collect_inputs(&mut referenced);
            if let Some(unknown) = referenced.difference(&inputs).next() {
                return invalid(format!("output `{}` refers to undeclared input `{unknown}`", output.name));
            }
        }
        Ok(())
    }

    pub fn to_mir_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        bincode::serialize(&(MIR_MAGIC, MIR_VERSION, self))
            .map_err(|e| Error::ProgramFormat(e.to_string()))
    }

    pub fn from_mir_bytes(bytes: &[u8]) -> Result<Self> {
        let (magic, version, program): ([u8; 4], u32, Program) = bincode::deserialize(bytes)
            .map_err(|e| Error::ProgramFormat(format!("not a compiled program: {e}")))?;
        if magic != MIR_MAGIC {
            return Err(Error::ProgramFormat("not a compiled program: bad magic".to_string()));
        }
        if version != MIR_VERSION {
            return Err(Error::ProgramFormat(format!("unsupported artifact version `{version}`")));
        }
        program.validate()?;
        Ok(program)
    }

    // all declared inputs must be present with their declared types
    pub fn evaluate(&self, inputs: &NadaValues) -> Result<NadaValues> {
        for decl in &self.inputs {
            let value = inputs.get(&decl.name)
                .ok_or_else(|| Error::Compute(format!("missing input `{}`", decl.name)))?;
            if value.value_type() != decl.ty {
                return Err(Error::Compute(format!(
                    "input `{}` is declared as `{:?}` but `{:?}` was supplied",
                    decl.name,
                    decl.ty,
                    value.value_type()
                )));
            }
        }
        let secret = self.inputs.iter().any(|decl| decl.ty.is_secret());
        let mut results = NadaValues::new();
        for output in &self.outputs {
            let raw = output.expr.eval(inputs)?;
            let value = i64::try_from(raw)
                .map_err(|_| Error::Compute(format!("output `{}` overflows: {raw}", output.name)))?;
            results.insert(
                output.name.clone(),
                if secret { NadaValue::SecretInteger(value) } else { NadaValue::Integer(value) },
            );
        }
        Ok(results)
    }
}

// compile a program description into `{out_dir}/{name}.nada.bin`
pub fn compile(source_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let program = Program::from_source(&fs::read_to_string(source_path)?)?;
    fs::create_dir_all(out_dir)?;
    let out_path = mir_path(out_dir, &program.name);
    fs::write(&out_path, program.to_mir_bytes()?)?;
    info!("Compiled `{}` into `{}`", source_path.display(), out_path.display());
    Ok(out_path)
}

/// Binds program parties to the nodes providing inputs and receiving outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBindings {
    pub program_id: ProgramId,
    pub input_parties: BTreeMap<String, PartyId>,
    pub output_parties: BTreeMap<String, PartyId>,
}

impl ProgramBindings {
    pub fn new(program_id: ProgramId) -> Self {
        Self {
            program_id,
            input_parties: BTreeMap::new(),
            output_parties: BTreeMap::new(),
        }
    }

    pub fn add_input_party(&mut self, name: impl Into<String>, party_id: PartyId) {
        self.input_parties.insert(name.into(), party_id);
    }

    pub fn add_output_party(&mut self, name: impl Into<String>, party_id: PartyId) {
        self.output_parties.insert(name.into(), party_id);
    }
}
