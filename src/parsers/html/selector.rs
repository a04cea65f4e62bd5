//! 结构选择器
//!
//! 用 `cssparser` 解析一个够用的选择器子集：类型、`.class`、`#id`、属性选择器
//! （`[a]`、`=`、`~=`、`|=`、`^=`、`$=`、`*=`）、`*`、复合选择器、后代组合符以及逗号列表。
//!
//! 匹配能力通过 [`ElementMatcher`] 暴露，测试中可以直接用闭包代替完整的选择器引擎。

use std::fmt;

use cssparser::{ParseError, Parser, ParserInput, Token};
use markup5ever_rcdom::Handle;

use super::dom::{get_node_attr, get_node_name, parent_element};

/// 元素匹配能力
pub trait ElementMatcher {
    fn matches(&self, element: &Handle) -> bool;
}

impl<F> ElementMatcher for F
where
    F: Fn(&Handle) -> bool,
{
    fn matches(&self, element: &Handle) -> bool {
        self(element)
    }
}

/// 选择器解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorError {
    pub selector: String,
    pub message: String,
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "无效的选择器 '{}': {}", self.selector, self.message)
    }
}

impl std::error::Error for SelectorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Includes,
    Dash,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone)]
struct AttrSelector {
    name: String,
    test: Option<(AttrOp, String)>,
}

impl AttrSelector {
    fn matches(&self, element: &Handle) -> bool {
        let Some(actual) = get_node_attr(element, &self.name) else {
            return false;
        };
        match &self.test {
            None => true,
            Some((AttrOp::Equals, v)) => actual == *v,
            Some((AttrOp::Includes, v)) => actual.split_ascii_whitespace().any(|w| w == v),
            Some((AttrOp::Dash, v)) => actual == *v || actual.starts_with(&format!("{}-", v)),
            Some((AttrOp::Prefix, v)) => !v.is_empty() && actual.starts_with(v.as_str()),
            Some((AttrOp::Suffix, v)) => !v.is_empty() && actual.ends_with(v.as_str()),
            Some((AttrOp::Substring, v)) => !v.is_empty() && actual.contains(v.as_str()),
        }
    }
}

/// 复合选择器：`tag#id.class[attr]`
#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
    universal: bool,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }

    fn matches(&self, element: &Handle) -> bool {
        let Some(name) = get_node_name(element) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if !name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if get_node_attr(element, "id").as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_attr = get_node_attr(element, "class").unwrap_or_default();
            let has_all = self
                .classes
                .iter()
                .all(|c| class_attr.split_ascii_whitespace().any(|w| w == c));
            if !has_all {
                return false;
            }
        }
        self.attrs.iter().all(|a| a.matches(element))
    }
}

/// 后代组合符连接的复合选择器序列（从左到右）
#[derive(Debug, Clone)]
struct ComplexSelector {
    parts: Vec<Compound>,
}

impl ComplexSelector {
    fn matches(&self, element: &Handle) -> bool {
        let Some((last, ancestors)) = self.parts.split_last() else {
            return false;
        };
        if !last.matches(element) {
            return false;
        }
        // 后代组合符下就近贪心匹配即可
        let mut cursor = parent_element(element);
        for part in ancestors.iter().rev() {
            loop {
                let Some(el) = cursor.take() else {
                    return false;
                };
                cursor = parent_element(&el);
                if part.matches(&el) {
                    break;
                }
            }
        }
        true
    }
}

/// 逗号分隔的选择器列表
#[derive(Debug, Clone)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    /// 解析单个选择器文本（可含逗号）
    pub fn parse(css: &str) -> Result<Self, SelectorError> {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        let fail = |message: String| SelectorError {
            selector: css.to_string(),
            message,
        };

        let mut selectors = Vec::new();
        let mut parts: Vec<Compound> = Vec::new();
        let mut current = Compound::default();

        loop {
            let token = match parser.next_including_whitespace() {
                Ok(token) => token.clone(),
                Err(_) => break,
            };
            match token {
                Token::Ident(name) => current.tag = Some(name.to_ascii_lowercase()),
                Token::Delim('*') => current.universal = true,
                Token::IDHash(id) => current.id = Some(id.to_string()),
                Token::Delim('.') => match parser.next_including_whitespace() {
                    Ok(Token::Ident(class)) => current.classes.push(class.to_string()),
                    _ => return Err(fail("'.' 之后需要类名".to_string())),
                },
                Token::SquareBracketBlock => {
                    let attr = parser
                        .parse_nested_block(parse_attribute)
                        .map_err(|e: ParseError<'_, ()>| fail(format!("{:?}", e.kind)))?;
                    current.attrs.push(attr);
                }
                Token::WhiteSpace(_) => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                Token::Comma => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                    if parts.is_empty() {
                        return Err(fail("空的选择器".to_string()));
                    }
                    selectors.push(ComplexSelector {
                        parts: std::mem::take(&mut parts),
                    });
                }
                other => return Err(fail(format!("不支持的记号 {:?}", other))),
            }
        }

        if !current.is_empty() {
            parts.push(current);
        }
        if !parts.is_empty() {
            selectors.push(ComplexSelector { parts });
        }
        if selectors.is_empty() {
            return Err(fail("空的选择器".to_string()));
        }
        Ok(Self { selectors })
    }

    /// 由多条选择器文本构建；无效条目记录警告后跳过
    pub fn from_many<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        let mut selectors = Vec::new();
        for source in sources {
            match Self::parse(source) {
                Ok(list) => selectors.extend(list.selectors),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        Self { selectors }
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }
}

impl ElementMatcher for SelectorList {
    fn matches(&self, element: &Handle) -> bool {
        self.selectors.iter().any(|s| s.matches(element))
    }
}

fn parse_attribute<'i, 't>(
    parser: &mut Parser<'i, 't>,
) -> Result<AttrSelector, ParseError<'i, ()>> {
    let name = parser.expect_ident()?.to_ascii_lowercase();
    if parser.is_exhausted() {
        return Ok(AttrSelector { name, test: None });
    }
    let location = parser.current_source_location();
    let op = match parser.next()? {
        Token::Delim('=') => AttrOp::Equals,
        Token::IncludeMatch => AttrOp::Includes,
        Token::DashMatch => AttrOp::Dash,
        Token::PrefixMatch => AttrOp::Prefix,
        Token::SuffixMatch => AttrOp::Suffix,
        Token::SubstringMatch => AttrOp::Substring,
        other => {
            let other = other.clone();
            return Err(location.new_unexpected_token_error(other));
        }
    };
    let value = parser.expect_ident_or_string()?.to_string();
    parser.expect_exhausted()?;
    Ok(AttrSelector {
        name,
        test: Some((op, value)),
    })
}
