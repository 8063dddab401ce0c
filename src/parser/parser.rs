//! Recursive-descent parser for form-logic expressions

use super::error::{ParseError, ParseResult};
use super::tokenizer::{SpannedToken, Token, tokenize};
use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator};

/// Parse a form-logic expression string into an AST
pub fn parse_expression(input: &str) -> ParseResult<ExpressionNode> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_conditional()?;
    match parser.peek() {
        None => Ok(expr),
        Some(spanned) => Err(ParseError::UnexpectedToken {
            token: format!("{:?}", spanned.token),
            position: spanned.position,
        }),
    }
}

struct Parser {
    tokens: Vec<SpannedToken>,
    index: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self { tokens, index: 0 }
    }

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.index);
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, description: &str) -> ParseResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.expected_error(description))
        }
    }

    fn expected_error(&self, description: &str) -> ParseError {
        match self.peek() {
            Some(spanned) => ParseError::ExpectedToken {
                expected: description.to_string(),
                position: spanned.position,
            },
            None => ParseError::UnexpectedEof,
        }
    }

    /// conditional := or ('?' conditional ':' conditional)?
    fn parse_conditional(&mut self) -> ParseResult<ExpressionNode> {
        let condition = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then_expr = self.parse_conditional()?;
            self.expect(Token::Colon, "':' in conditional expression")?;
            let else_expr = self.parse_conditional()?;
            Ok(ExpressionNode::conditional(condition, then_expr, else_expr))
        } else {
            Ok(condition)
        }
    }

    fn parse_or(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = ExpressionNode::binary_op(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_equality()?;
            left = ExpressionNode::binary_op(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Equal) => BinaryOperator::Equal,
                Some(Token::NotEqual) => BinaryOperator::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = ExpressionNode::binary_op(op, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Less) => BinaryOperator::Less,
                Some(Token::LessOrEqual) => BinaryOperator::LessOrEqual,
                Some(Token::Greater) => BinaryOperator::Greater,
                Some(Token::GreaterOrEqual) => BinaryOperator::GreaterOrEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = ExpressionNode::binary_op(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Plus) => BinaryOperator::Add,
                Some(Token::Minus) => BinaryOperator::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = ExpressionNode::binary_op(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<ExpressionNode> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Star) => BinaryOperator::Multiply,
                Some(Token::Slash) => BinaryOperator::Divide,
                Some(Token::Percent) => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = ExpressionNode::binary_op(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<ExpressionNode> {
        let op = match self.peek().map(|s| &s.token) {
            Some(Token::Minus) => Some(UnaryOperator::Minus),
            Some(Token::Bang) => Some(UnaryOperator::Not),
            Some(Token::TypeOf) => Some(UnaryOperator::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            Ok(ExpressionNode::unary_op(op, operand))
        } else {
            self.parse_postfix()
        }
    }

    /// postfix := primary ('.' ident ('(' args ')')? | '[' expression ']')*
    fn parse_postfix(&mut self) -> ParseResult<ExpressionNode> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let Some(spanned) = self.advance().cloned() else {
                    return Err(ParseError::UnexpectedEof);
                };
                let name = match spanned.token {
                    Token::Identifier(name) => name,
                    other => {
                        return Err(ParseError::UnexpectedToken {
                            token: format!("{other:?}"),
                            position: spanned.position,
                        });
                    }
                };
                if self.eat(&Token::LeftParen) {
                    let args = self.parse_arguments()?;
                    expr = ExpressionNode::method_call(expr, name, args);
                } else {
                    expr = ExpressionNode::member(expr, name);
                }
            } else if self.eat(&Token::LeftBracket) {
                let index = self.parse_conditional()?;
                self.expect(Token::RightBracket, "']' after index expression")?;
                expr = ExpressionNode::index(expr, index);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<ExpressionNode>> {
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_conditional()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RightParen, "',' or ')' in argument list")?;
            break;
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<ExpressionNode> {
        let Some(spanned) = self.advance().cloned() else {
            return Err(ParseError::UnexpectedEof);
        };
        match spanned.token {
            Token::Number(n) => Ok(ExpressionNode::literal(LiteralValue::Number(n))),
            Token::String(s) => Ok(ExpressionNode::literal(LiteralValue::String(s))),
            Token::True => Ok(ExpressionNode::literal(LiteralValue::Boolean(true))),
            Token::False => Ok(ExpressionNode::literal(LiteralValue::Boolean(false))),
            Token::Null => Ok(ExpressionNode::literal(LiteralValue::Null)),
            Token::Identifier(name) => Ok(ExpressionNode::identifier(name)),
            Token::LeftParen => {
                let expr = self.parse_conditional()?;
                self.expect(Token::RightParen, "')' after parenthesized expression")?;
                Ok(expr)
            }
            other => Err(ParseError::UnexpectedToken {
                token: format!("{other:?}"),
                position: spanned.position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_member_chains() {
        let expr = parse_expression("formValue.user.role").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::member(
                ExpressionNode::member(ExpressionNode::identifier("formValue"), "user"),
                "role"
            )
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::binary_op(
                BinaryOperator::Add,
                ExpressionNode::literal(LiteralValue::Number(1.0)),
                ExpressionNode::binary_op(
                    BinaryOperator::Multiply,
                    ExpressionNode::literal(LiteralValue::Number(2.0)),
                    ExpressionNode::literal(LiteralValue::Number(3.0)),
                ),
            )
        );
    }

    #[test]
    fn comparison_binds_tighter_than_logical() {
        let expr = parse_expression("a > 1 && b < 2 || c == 3").unwrap();
        let expected = ExpressionNode::binary_op(
            BinaryOperator::Or,
            ExpressionNode::binary_op(
                BinaryOperator::And,
                ExpressionNode::binary_op(
                    BinaryOperator::Greater,
                    ExpressionNode::identifier("a"),
                    ExpressionNode::literal(LiteralValue::Number(1.0)),
                ),
                ExpressionNode::binary_op(
                    BinaryOperator::Less,
                    ExpressionNode::identifier("b"),
                    ExpressionNode::literal(LiteralValue::Number(2.0)),
                ),
            ),
            ExpressionNode::binary_op(
                BinaryOperator::Equal,
                ExpressionNode::identifier("c"),
                ExpressionNode::literal(LiteralValue::Number(3.0)),
            ),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn parses_method_calls_with_arguments() {
        let expr = parse_expression("fieldValue.includes('x', 1)").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::method_call(
                ExpressionNode::identifier("fieldValue"),
                "includes",
                vec![
                    ExpressionNode::literal(LiteralValue::String("x".into())),
                    ExpressionNode::literal(LiteralValue::Number(1.0)),
                ],
            )
        );
    }

    #[test]
    fn parses_conditional_operator() {
        let expr = parse_expression("a ? 1 : b ? 2 : 3").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::conditional(
                ExpressionNode::identifier("a"),
                ExpressionNode::literal(LiteralValue::Number(1.0)),
                ExpressionNode::conditional(
                    ExpressionNode::identifier("b"),
                    ExpressionNode::literal(LiteralValue::Number(2.0)),
                    ExpressionNode::literal(LiteralValue::Number(3.0)),
                ),
            )
        );
    }

    #[test]
    fn parses_index_access() {
        let expr = parse_expression("formValue.items[0]").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::index(
                ExpressionNode::member(ExpressionNode::identifier("formValue"), "items"),
                ExpressionNode::literal(LiteralValue::Number(0.0)),
            )
        );
    }

    #[test]
    fn typeof_is_a_prefix_operator() {
        let expr = parse_expression("typeof fieldValue == 'string'").unwrap();
        assert_eq!(
            expr,
            ExpressionNode::binary_op(
                BinaryOperator::Equal,
                ExpressionNode::unary_op(
                    UnaryOperator::TypeOf,
                    ExpressionNode::identifier("fieldValue")
                ),
                ExpressionNode::literal(LiteralValue::String("string".into())),
            )
        );
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            parse_expression("1 + 2 3"),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(parse_expression("(1 + 2").is_err());
        assert!(parse_expression("a.b(").is_err());
    }
}
