//! Turns a tokenized source line into a [`Statement`].
//!
//! Grounded on `original_source/evil/parser.py`: `build_expression_tree`'s
//! recursive paren-folding followed by three left-to-right precedence
//! passes is preserved exactly, including its quirk that a leading
//! operator with no left-hand side folds into a [`UnaryOp`] only within
//! whichever precedence tier first reaches it at index 0.

use crate::ast::{Argument, BinaryOp, Expression, Statement, UnaryOp};
use crate::error::AssembleError;
use crate::register::Register;
use crate::token::{tokenize, Token};

const PRECEDENCE_TIERS: [&[&str]; 3] = [&["<<", ">>"], &["*", "/"], &["+", "-"]];

fn syntax_error(line: usize, message: impl Into<String>) -> AssembleError {
    AssembleError::Syntax {
        line,
        message: message.into(),
    }
}

fn is_identifier_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_integer(token: &str) -> Option<i128> {
    let (negative, rest) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")) {
        i128::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        i128::from_str_radix(bin, 2).ok()?
    } else {
        rest.parse::<i128>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn unescape(body: &str) -> Vec<i128> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                'n' => {
                    out.push('\n' as i128);
                    i += 2;
                }
                't' => {
                    out.push('\t' as i128);
                    i += 2;
                }
                'r' => {
                    out.push('\r' as i128);
                    i += 2;
                }
                '0' => {
                    out.push(0);
                    i += 2;
                }
                'x' => {
                    let hex: String = chars[i + 2..]
                        .iter()
                        .take(2)
                        .take_while(|c| c.is_ascii_hexdigit())
                        .collect();
                    if hex.is_empty() {
                        out.push('x' as i128);
                        i += 2;
                    } else {
                        out.push(i128::from_str_radix(&hex, 16).unwrap_or(0));
                        i += 2 + hex.len();
                    }
                }
                other => {
                    out.push(other as i128);
                    i += 2;
                }
            }
        } else {
            out.push(chars[i] as i128);
            i += 1;
        }
    }
    out
}

/// True if `token` is a quoted character literal (`'c'`) that unescapes to
/// exactly one codepoint.
fn character_value(token: &str) -> Option<i128> {
    let body = token.strip_prefix('\'')?.strip_suffix('\'')?;
    let codepoints = unescape(body);
    if codepoints.len() == 1 {
        Some(codepoints[0])
    } else {
        None
    }
}

fn string_literal_values(token: &str) -> Option<Vec<i128>> {
    let body = token.strip_prefix('"')?.strip_suffix('"')?;
    Some(unescape(body))
}

#[derive(Debug, Clone)]
enum Item {
    Expr(Expression),
    Op(String),
}

fn classify_token(token: &Token) -> Item {
    if let Some(value) = parse_integer(token) {
        Item::Expr(Expression::Numeric(value))
    } else if let Some(value) = character_value(token) {
        Item::Expr(Expression::Character(value))
    } else if is_identifier_token(token) {
        Item::Expr(Expression::ConstantRef(token.clone()))
    } else {
        Item::Op(token.clone())
    }
}

fn find_matching_paren(tokens: &[Token], open_idx: usize, line: usize) -> Result<usize, AssembleError> {
    let mut depth = 0usize;
    for (offset, token) in tokens[open_idx..].iter().enumerate() {
        let idx = open_idx + offset;
        if token == "(" {
            depth += 1;
        } else if token == ")" {
            depth -= 1;
            if depth == 0 {
                return Ok(idx);
            }
        }
    }
    Err(syntax_error(line, "mismatched parens - unclosed"))
}

/// `sizeof`/`alignof` are not part of original_source — the spec
/// introduces them as function-call-shaped unary operators resolved
/// against the type registry or operation table. Recognized here as
/// `NAME '(' IDENT ')'` rather than folded through the generic
/// precedence tiers, since their operand is always a bare name, never a
/// sub-expression.
fn try_parse_size_query(tokens: &[Token], idx: usize, line: usize) -> Option<Result<(Expression, usize), AssembleError>> {
    let op = match tokens.get(idx)?.as_str() {
        "sizeof" => UnaryOp::SizeOf,
        "alignof" => UnaryOp::AlignOf,
        _ => return None,
    };
    if tokens.get(idx + 1)? != "(" {
        return None;
    }
    let close = match find_matching_paren(tokens, idx + 1, line) {
        Ok(close) => close,
        Err(err) => return Some(Err(err)),
    };
    let inner = &tokens[idx + 2..close];
    if inner.len() != 1 || !is_identifier_token(&inner[0]) {
        return Some(Err(syntax_error(line, format!("{}(...) expects a single name", tokens[idx]))));
    }
    let expr = Expression::Unary(op, Box::new(Expression::ConstantRef(inner[0].clone())));
    Some(Ok((expr, close + 1 - idx)))
}

fn build_tree(tokens: &[Token], line: usize) -> Result<Vec<Item>, AssembleError> {
    let mut items = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Some(result) = try_parse_size_query(tokens, i, line) {
            let (expr, consumed) = result?;
            items.push(Item::Expr(expr));
            i += consumed;
        } else if tokens[i] == "(" {
            let close = find_matching_paren(tokens, i, line)?;
            let inner = build_tree(&tokens[i + 1..close], line)?;
            items.push(Item::Expr(fold_precedence(inner, line)?));
            i = close + 1;
        } else if tokens[i] == ")" {
            return Err(syntax_error(line, "mismatched parens"));
        } else {
            items.push(classify_token(&tokens[i]));
            i += 1;
        }
    }
    Ok(items)
}

fn unary_op_from_str(op: &str, line: usize) -> Result<UnaryOp, AssembleError> {
    match op {
        "+" => Ok(UnaryOp::Plus),
        "-" => Ok(UnaryOp::Minus),
        other => Err(syntax_error(line, format!("invalid unary operator: {other}"))),
    }
}

fn binary_op_from_str(op: &str, line: usize) -> Result<BinaryOp, AssembleError> {
    match op {
        "+" => Ok(BinaryOp::Add),
        "-" => Ok(BinaryOp::Sub),
        "*" => Ok(BinaryOp::Mul),
        "/" => Ok(BinaryOp::Div),
        "<<" => Ok(BinaryOp::Shl),
        ">>" => Ok(BinaryOp::Shr),
        other => Err(syntax_error(line, format!("invalid binary operator: {other}"))),
    }
}

fn take_expr(item: Item, line: usize) -> Result<Expression, AssembleError> {
    match item {
        Item::Expr(e) => Ok(e),
        Item::Op(op) => Err(syntax_error(line, format!("expected an expression, found '{op}'"))),
    }
}

fn op_str(item: &Item) -> Option<&str> {
    match item {
        Item::Op(op) => Some(op.as_str()),
        Item::Expr(_) => None,
    }
}

fn fold_precedence(mut tree: Vec<Item>, line: usize) -> Result<Expression, AssembleError> {
    for tier in PRECEDENCE_TIERS {
        let mut idx = 0usize;
        while idx + 1 < tree.len() {
            let is_tier_op = op_str(&tree[idx]).map(|op| tier.contains(&op)).unwrap_or(false);
            if !is_tier_op {
                idx += 1;
                continue;
            }
            if idx == 0 {
                let op = op_str(&tree[0]).unwrap().to_string();
                let operand = take_expr(tree[1].clone(), line)?;
                let unary = Expression::Unary(unary_op_from_str(&op, line)?, Box::new(operand));
                tree.splice(0..2, [Item::Expr(unary)]);
            } else {
                let op = op_str(&tree[idx]).unwrap().to_string();
                let lhs = take_expr(tree[idx - 1].clone(), line)?;
                let rhs = take_expr(tree[idx + 1].clone(), line)?;
                let binary = Expression::Binary(Box::new(lhs), binary_op_from_str(&op, line)?, Box::new(rhs));
                tree.splice(idx - 1..idx + 2, [Item::Expr(binary)]);
            }
        }
    }

    if tree.len() == 1 {
        take_expr(tree.remove(0), line)
    } else {
        Err(syntax_error(line, "unable to form a valid expression"))
    }
}

/// Builds an [`Expression`] tree from a token slice (the right-hand side
/// of a constant definition, a `db`/`da`/`dw` element, or an instruction
/// argument).
pub fn build_expression(tokens: &[Token], line: usize) -> Result<Expression, AssembleError> {
    if tokens.is_empty() {
        return Err(syntax_error(line, "expected an expression, found nothing"));
    }
    let tree = build_tree(tokens, line)?;
    fold_precedence(tree, line)
}

fn split_on_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (idx, token) in tokens.iter().enumerate() {
        if token == "," {
            groups.push(&tokens[start..idx]);
            start = idx + 1;
        }
    }
    groups.push(&tokens[start..]);
    groups
}

/// Builds a plain expression list (`db`/`da`/`dw` operands): comma-
/// separated groups, with a single string-literal group expanding into
/// one [`Expression::Character`] per codepoint.
pub fn build_expression_list(tokens: &[Token], line: usize) -> Result<Vec<Expression>, AssembleError> {
    let mut values = Vec::new();
    for group in split_on_commas(tokens) {
        if group.len() == 1 {
            if let Some(codepoints) = string_literal_values(&group[0]) {
                values.extend(codepoints.into_iter().map(Expression::Character));
                continue;
            }
        }
        values.push(build_expression(group, line)?);
    }
    Ok(values)
}

/// Builds an instruction's argument list: like
/// [`build_expression_list`], but a one-token group matching a register
/// name becomes an [`Argument::Register`].
pub fn build_argument_list(tokens: &[Token], line: usize) -> Result<Vec<Argument>, AssembleError> {
    let mut args = Vec::new();
    for group in split_on_commas(tokens) {
        if group.len() == 1 {
            if let Some(reg) = Register::by_name(&group[0]) {
                args.push(Argument::Register(reg));
                continue;
            }
            if let Some(codepoints) = string_literal_values(&group[0]) {
                args.extend(codepoints.into_iter().map(|c| Argument::Expr(Expression::Character(c))));
                continue;
            }
        }
        args.push(Argument::Expr(build_expression(group, line)?));
    }
    Ok(args)
}

fn strip_comment(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    let mut quote: Option<char> = None;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
        } else if c == '"' || c == '\'' {
            quote = Some(c);
            i += 1;
        } else if c == ';' {
            return chars[..i].iter().collect();
        } else {
            i += 1;
        }
    }
    chars.into_iter().collect()
}

fn data_directive_type(mnemonic: &str) -> Option<char> {
    match mnemonic {
        "db" => Some('b'),
        "da" => Some('a'),
        "dw" => Some('w'),
        _ => None,
    }
}

/// Parses one source line into at most one [`Statement`].
///
/// `line` is the 1-indexed source line number, used for diagnostics.
/// Blank lines and comment-only lines return `Ok(None)`.
pub fn parse_statement(text: &str, line: usize) -> Result<Option<Statement>, AssembleError> {
    let without_comment = strip_comment(text);
    let tokens = tokenize(without_comment.trim()).map_err(|err| syntax_error(line, err.to_string()))?;

    if tokens.is_empty() {
        return Ok(None);
    }

    if tokens.len() == 2 && is_identifier_token(&tokens[0]) && tokens[1] == ":" {
        return Ok(Some(Statement::Label(tokens[0].clone())));
    }

    if tokens.len() >= 2 && is_identifier_token(&tokens[0]) && tokens[1] == "=" {
        let value = build_expression(&tokens[2..], line)?;
        return Ok(Some(Statement::ConstantDefinition {
            name: tokens[0].clone(),
            value,
        }));
    }

    if is_identifier_token(&tokens[0]) {
        if let Some(datatype) = data_directive_type(&tokens[0]) {
            let values = build_expression_list(&tokens[1..], line)?;
            return Ok(Some(Statement::Data { datatype, values }));
        }
        let args = build_argument_list(&tokens[1..], line)?;
        return Ok(Some(Statement::Instruction {
            mnemonic: tokens[0].clone(),
            args,
        }));
    }

    Err(syntax_error(line, format!("unable to parse statement: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label() {
        assert_eq!(
            parse_statement("loop_start:", 1).unwrap(),
            Some(Statement::Label("loop_start".into()))
        );
    }

    #[test]
    fn parses_constant_definition() {
        assert_eq!(
            parse_statement("FOO = 1 + 2", 1).unwrap(),
            Some(Statement::ConstantDefinition {
                name: "FOO".into(),
                value: Expression::Binary(
                    Box::new(Expression::Numeric(1)),
                    BinaryOp::Add,
                    Box::new(Expression::Numeric(2)),
                ),
            })
        );
    }

    #[test]
    fn left_to_right_same_tier_associates_left() {
        // 1 - 2 - 3 == (1 - 2) - 3
        let expr = build_expression(&tokenize("1 - 2 - 3").unwrap(), 1).unwrap();
        assert_eq!(
            expr,
            Expression::Binary(
                Box::new(Expression::Binary(
                    Box::new(Expression::Numeric(1)),
                    BinaryOp::Sub,
                    Box::new(Expression::Numeric(2)),
                )),
                BinaryOp::Sub,
                Box::new(Expression::Numeric(3)),
            )
        );
    }

    #[test]
    fn leading_minus_is_unary() {
        let expr = build_expression(&tokenize("-5").unwrap(), 1).unwrap();
        assert_eq!(expr, Expression::Unary(UnaryOp::Minus, Box::new(Expression::Numeric(5))));
    }

    #[test]
    fn parens_override_precedence() {
        let expr = build_expression(&tokenize("(1 + 2) * 3").unwrap(), 1).unwrap();
        assert_eq!(
            expr,
            Expression::Binary(
                Box::new(Expression::Binary(
                    Box::new(Expression::Numeric(1)),
                    BinaryOp::Add,
                    Box::new(Expression::Numeric(2)),
                )),
                BinaryOp::Mul,
                Box::new(Expression::Numeric(3)),
            )
        );
    }

    #[test]
    fn mismatched_parens_is_syntax_error() {
        assert!(build_expression(&tokenize("(1 + 2").unwrap(), 3).is_err());
    }

    #[test]
    fn sizeof_resolves_a_bare_name() {
        let expr = build_expression(&tokenize("sizeof(w)").unwrap(), 1).unwrap();
        assert_eq!(
            expr,
            Expression::Unary(UnaryOp::SizeOf, Box::new(Expression::ConstantRef("w".into())))
        );
    }

    #[test]
    fn data_directive_parses_string_literal_into_characters() {
        let stmt = parse_statement(r#"db "Hi""#, 1).unwrap().unwrap();
        assert_eq!(
            stmt,
            Statement::Data {
                datatype: 'b',
                values: vec![Expression::Character('H' as i128), Expression::Character('i' as i128)],
            }
        );
    }

    #[test]
    fn instruction_parses_register_and_immediate_args() {
        let stmt = parse_statement("movb.i2r A, 1", 1).unwrap().unwrap();
        assert_eq!(
            stmt,
            Statement::Instruction {
                mnemonic: "movb.i2r".into(),
                args: vec![Argument::Register(Register::A), Argument::Expr(Expression::Numeric(1))],
            }
        );
    }

    #[test]
    fn comment_only_line_is_blank() {
        assert_eq!(parse_statement("   ; a comment", 1).unwrap(), None);
    }

    #[test]
    fn trailing_comment_is_stripped() {
        let stmt = parse_statement("halt ; done", 1).unwrap().unwrap();
        assert_eq!(
            stmt,
            Statement::Instruction {
                mnemonic: "halt".into(),
                args: vec![],
            }
        );
    }
}
