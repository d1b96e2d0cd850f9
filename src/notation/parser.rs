//! Parsers for einsum subscripts and bracketed tree notation.

use crate::error::{ContractionError, ContractionResult};
use crate::types::DimId;

use super::{EinsumExpr, TreeExpr};

/// Parses a binary einsum expression.
///
/// # Grammar
///
/// ```text
/// einsum    ::= subscript ',' subscript '->' subscript
/// subscript ::= index*
/// index     ::= [a-zA-Z]
/// ```
///
/// The output subscript is mandatory and exactly two operands are
/// accepted; larger expressions must state their contraction order as
/// a tree (see [`parse_tree`]).
pub fn parse_einsum(notation: &str) -> ContractionResult<EinsumExpr> {
    let notation = notation.trim();
    let Some(arrow) = notation.find("->") else {
        return Err(ContractionError::parse("expected '->' and an output subscript"));
    };
    let inputs = &notation[..arrow];
    let output = &notation[arrow + 2..];

    let operands: Vec<&str> = inputs.split(',').collect();
    if operands.len() != 2 {
        return Err(ContractionError::parse(format!(
            "expected exactly two operands, found {}",
            operands.len()
        )));
    }

    Ok(EinsumExpr {
        left: parse_subscript(operands[0])?,
        right: parse_subscript(operands[1])?,
        out: parse_subscript(output)?,
    })
}

/// Parses bracketed contraction-tree notation.
///
/// # Grammar
///
/// ```text
/// tree      ::= subscript | '[' tree ',' tree '->' subscript ']'
/// ```
///
/// # Examples
///
/// ```
/// use einsum_loops::notation::parse_tree;
///
/// // one contraction
/// parse_tree("[km,nk->nm]").unwrap();
/// // a three-operand chain with explicit order
/// parse_tree("[[ij,jk->ik],kl->il]").unwrap();
/// ```
pub fn parse_tree(notation: &str) -> ContractionResult<TreeExpr> {
    let mut parser = Parser {
        rest: notation.trim(),
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    if !parser.rest.is_empty() {
        return Err(ContractionError::parse(format!(
            "trailing input '{}'",
            parser.rest
        )));
    }
    Ok(expr)
}

fn parse_subscript(s: &str) -> ContractionResult<Vec<DimId>> {
    let mut dims = Vec::new();
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' => {
                let dim = c as DimId;
                if dims.contains(&dim) {
                    return Err(ContractionError::parse(format!(
                        "repeated index '{c}' in subscript"
                    )));
                }
                dims.push(dim);
            }
            ' ' | '\t' => continue,
            _ => {
                return Err(ContractionError::parse(format!(
                    "invalid character '{c}' in subscript"
                )));
            }
        }
    }
    Ok(dims)
}

struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, token: &str) -> ContractionResult<()> {
        self.skip_ws();
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(ContractionError::parse(format!(
                "expected '{}' at '{}'",
                token, self.rest
            ))),
        }
    }

    fn expr(&mut self) -> ContractionResult<TreeExpr> {
        self.skip_ws();
        if self.rest.starts_with('[') {
            self.eat("[")?;
            let left = self.expr()?;
            self.eat(",")?;
            let right = self.expr()?;
            self.eat("->")?;
            let out = self.subscript()?;
            self.eat("]")?;
            Ok(TreeExpr::Contract {
                left: Box::new(left),
                right: Box::new(right),
                out,
            })
        } else {
            Ok(TreeExpr::Leaf(self.subscript()?))
        }
    }

    fn subscript(&mut self) -> ContractionResult<Vec<DimId>> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_alphabetic() && c != ' ' && c != '\t')
            .unwrap_or(self.rest.len());
        let (sub, rest) = self.rest.split_at(end);
        self.rest = rest;
        parse_subscript(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matmul() {
        let expr = parse_einsum("km,nk->nm").unwrap();
        assert_eq!(expr.left, vec!['k' as i64, 'm' as i64]);
        assert_eq!(expr.right, vec!['n' as i64, 'k' as i64]);
        assert_eq!(expr.out, vec!['n' as i64, 'm' as i64]);
    }

    #[test]
    fn test_parse_scalar_output() {
        let expr = parse_einsum("i,i->").unwrap();
        assert!(expr.out.is_empty());
    }

    #[test]
    fn test_missing_arrow_rejected() {
        assert!(parse_einsum("ij,jk").is_err());
    }

    #[test]
    fn test_three_operands_rejected() {
        assert!(parse_einsum("ij,jk,kl->il").is_err());
    }

    #[test]
    fn test_repeated_index_rejected() {
        assert!(parse_einsum("ii,ij->ij").is_err());
    }

    #[test]
    fn test_parse_single_contraction_tree() {
        let expr = parse_tree("[km,nk->nm]").unwrap();
        let TreeExpr::Contract { left, right, out } = expr else {
            panic!("expected a contraction");
        };
        assert_eq!(*left, TreeExpr::Leaf(vec!['k' as i64, 'm' as i64]));
        assert_eq!(*right, TreeExpr::Leaf(vec!['n' as i64, 'k' as i64]));
        assert_eq!(out, vec!['n' as i64, 'm' as i64]);
    }

    #[test]
    fn test_parse_nested_tree() {
        let expr = parse_tree("[[hd,abcd->abch],fb->acfh]").unwrap();
        assert_eq!(expr.num_leaves(), 3);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(parse_tree("[ij,jk->ik]extra").is_err());
        assert!(parse_tree("[ij,jk->ik").is_err());
    }

    #[test]
    fn test_whitespace_tolerated() {
        let expr = parse_tree("[ ij , jk -> ik ]").unwrap();
        assert_eq!(expr.num_leaves(), 2);
    }
}
