use std::str::FromStr;

use located::{LocatedStr, to_pos};
use nom::{
    Finish, IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{digit1, satisfy},
    combinator::{cut, eof, map, map_res, not, opt, recognize},
    error::{VerboseError, VerboseErrorKind, context},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
};
use rustc_hash::FxHashSet;
use vec_map::VecMap;

use crate::error::{MemSsaError, Result};
use crate::ir::*;
use crate::mem_ssa_error;

mod located;

type PResult<'a, O> = IResult<LocatedStr<'a>, O, VerboseError<LocatedStr<'a>>>;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn space(input: LocatedStr<'_>) -> PResult<'_, ()> {
    map(take_while1(|c: char| c.is_ascii_whitespace()), |_| ())(input)
}

fn line_comment(input: LocatedStr<'_>) -> PResult<'_, ()> {
    let (input, _) = tag(";")(input)?;
    let (input, _) = take_while(|c: char| c != '\n')(input)?;
    Ok((input, ()))
}

fn ignore(input: LocatedStr<'_>) -> PResult<'_, ()> {
    let (input, _) = many0(alt((space, line_comment)))(input)?;
    Ok((input, ()))
}

fn sym<'a>(s: &'static str) -> impl FnMut(LocatedStr<'a>) -> PResult<'a, LocatedStr<'a>> {
    preceded(ignore, tag(s))
}

// "int"と"intx"を区別する
fn keyword<'a>(kw: &'static str) -> impl FnMut(LocatedStr<'a>) -> PResult<'a, LocatedStr<'a>> {
    preceded(ignore, terminated(tag(kw), not(satisfy(is_ident_char))))
}

fn name(input: LocatedStr<'_>) -> PResult<'_, String> {
    let (input, _) = ignore(input)?;
    let (input, name) = recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)?;
    Ok((input, name.fragment().to_string()))
}

fn index(input: LocatedStr<'_>) -> PResult<'_, usize> {
    map_res(digit1, |digits: LocatedStr| digits.fragment().parse::<usize>())(input)
}

fn local(input: LocatedStr<'_>) -> PResult<'_, LocalId> {
    map(preceded(ignore, preceded(tag("l"), index)), LocalId::from)(input)
}

fn bb_id(input: LocatedStr<'_>) -> PResult<'_, BasicBlockId> {
    map(preceded(ignore, preceded(tag("bb"), index)), BasicBlockId::from)(input)
}

fn int_literal(input: LocatedStr<'_>) -> PResult<'_, i64> {
    let (input, _) = ignore(input)?;
    map_res(recognize(pair(opt(tag("-")), digit1)), |s: LocatedStr| {
        s.fragment().parse::<i64>()
    })(input)
}

fn locals(input: LocatedStr<'_>) -> PResult<'_, Vec<LocalId>> {
    delimited(sym("("), separated_list0(sym(","), local), sym(")"))(input)
}

fn binary(input: LocatedStr<'_>) -> PResult<'_, (LocalId, LocalId)> {
    separated_pair(local, sym(","), local)(input)
}

fn call(input: LocatedStr<'_>) -> PResult<'_, InstrCall> {
    let (input, _) = keyword("call")(input)?;
    let (input, effect) = cut(opt(preceded(
        tag("."),
        map_res(name, |effect| MemoryEffect::from_str(&effect)),
    )))(input)?;
    let (input, (callee, args)) = cut(pair(name, locals))(input)?;
    Ok((
        input,
        InstrCall {
            callee,
            args,
            effect: effect.unwrap_or_default(),
        },
    ))
}

fn phi_incoming(input: LocatedStr<'_>) -> PResult<'_, PhiIncoming> {
    map(
        delimited(sym("["), separated_pair(bb_id, sym(":"), local), sym("]")),
        |(bb, local)| PhiIncoming { bb, local },
    )(input)
}

fn instr_kind(input: LocatedStr<'_>) -> PResult<'_, InstrKind> {
    alt((
        map(keyword("nop"), |_| InstrKind::Nop),
        map(preceded(keyword("int"), cut(int_literal)), InstrKind::Int),
        map(preceded(keyword("add"), cut(binary)), |(a, b)| {
            InstrKind::Add(a, b)
        }),
        map(preceded(keyword("sub"), cut(binary)), |(a, b)| {
            InstrKind::Sub(a, b)
        }),
        map(preceded(keyword("mul"), cut(binary)), |(a, b)| {
            InstrKind::Mul(a, b)
        }),
        map(preceded(keyword("load"), cut(local)), InstrKind::Load),
        map(preceded(keyword("store"), cut(binary)), |(ptr, value)| {
            InstrKind::Store(ptr, value)
        }),
        map(call, InstrKind::Call),
        map(
            preceded(keyword("phi"), cut(separated_list1(sym(","), phi_incoming))),
            InstrKind::Phi,
        ),
    ))(input)
}

fn instr(input: LocatedStr<'_>) -> PResult<'_, Instr> {
    let (input, local) = opt(terminated(local, sym("=")))(input)?;
    let (input, kind) = if local.is_some() {
        context("instruction", cut(instr_kind))(input)?
    } else {
        instr_kind(input)?
    };
    Ok((input, Instr::new(local, kind)))
}

fn terminator(input: LocatedStr<'_>) -> PResult<'_, TerminatorInstr> {
    alt((
        map(preceded(keyword("return"), opt(local)), TerminatorInstr::Return),
        map(preceded(keyword("jump"), cut(bb_id)), TerminatorInstr::Jump),
        map(
            preceded(
                keyword("if"),
                cut(tuple((local, keyword("then"), bb_id, keyword("else"), bb_id))),
            ),
            |(cond, _, then_bb, _, else_bb)| TerminatorInstr::If(cond, then_bb, else_bb),
        ),
    ))(input)
}

fn block(input: LocatedStr<'_>) -> PResult<'_, BasicBlock> {
    let (input, id) = bb_id(input)?;
    let (input, _) = cut(sym(":"))(input)?;
    let (input, instrs) = many0(instr)(input)?;
    let (input, next) = context("terminator", cut(terminator))(input)?;
    Ok((input, BasicBlock { id, instrs, next }))
}

struct ParsedFunc {
    name: String,
    args: Vec<LocalId>,
    blocks: Vec<BasicBlock>,
}

fn func(input: LocatedStr<'_>) -> PResult<'_, ParsedFunc> {
    let (input, _) = keyword("func")(input)?;
    let (input, (name, args, _, blocks, _)) = context(
        "func",
        cut(tuple((name, locals, sym("{"), many1(block), sym("}")))),
    )(input)?;
    Ok((input, ParsedFunc { name, args, blocks }))
}

fn funcs(input: LocatedStr<'_>) -> PResult<'_, Vec<ParsedFunc>> {
    let (input, funcs) = many0(func)(input)?;
    let (input, _) = ignore(input)?;
    let (input, _) = eof(input)?;
    Ok((input, funcs))
}

fn convert_error(e: VerboseError<LocatedStr>) -> MemSsaError {
    let mut result = String::new();

    for (substring, kind) in e.errors.iter() {
        let pos = to_pos(substring);

        let line = match kind {
            VerboseErrorKind::Char(c) => match substring.fragment().chars().next() {
                Some(actual) => format!("{}: expected '{}', found {}\n", pos, c, actual),
                None => format!("{}: expected '{}', got end of input\n", pos, c),
            },
            VerboseErrorKind::Context(s) => format!("{}, in {}:\n", pos, s),
            VerboseErrorKind::Nom(e) => format!("{}, in {:?}:\n", pos, e),
        };
        result.push_str(&line);
    }

    MemSsaError(result)
}

fn build_func(id: FuncId, parsed: ParsedFunc) -> Result<Func> {
    let Some(bb_entry) = parsed.blocks.first().map(|bb| bb.id) else {
        return Err(mem_ssa_error!("{} has no blocks", parsed.name));
    };

    let mut bbs = VecMap::new();
    let mut bb_order = Vec::with_capacity(parsed.blocks.len());
    for bb in parsed.blocks {
        if bbs.contains_key(bb.id) {
            return Err(mem_ssa_error!("{} is defined twice in {}", bb.id, parsed.name));
        }
        bb_order.push(bb.id);
        bbs.insert(bb.id, bb);
    }

    for &bb_id in &bb_order {
        let bb = &bbs[bb_id];
        for target in bb.next.successors() {
            if !bbs.contains_key(target) {
                return Err(mem_ssa_error!(
                    "{} jumps to undefined block {} in {}",
                    bb.id,
                    target,
                    parsed.name
                ));
            }
        }
        for instr in &bb.instrs {
            if let InstrKind::Phi(incomings) = &instr.kind
                && let Some(incoming) = incomings.iter().find(|incoming| !bbs.contains_key(incoming.bb))
            {
                return Err(mem_ssa_error!(
                    "phi in {} refers to undefined block {} in {}",
                    bb.id,
                    incoming.bb,
                    parsed.name
                ));
            }
        }
    }

    Ok(Func {
        id,
        name: parsed.name,
        args: parsed.args,
        bb_entry,
        bbs,
        bb_order,
    })
}

// 各関数の最初のブロックがエントリ。ブロックの並びと関数idはファイル中の順
pub fn parse_module(input: &str) -> Result<Module> {
    let input = LocatedStr::new(input);
    let (_, parsed) = funcs(input).finish().map_err(convert_error)?;

    let mut module = Module::default();
    let mut names = FxHashSet::default();
    for parsed_func in parsed {
        // dotファイル名に使うので関数名は一意
        if !names.insert(parsed_func.name.clone()) {
            return Err(mem_ssa_error!("function {} is defined twice", parsed_func.name));
        }
        let id = module.funcs.next_key();
        module.funcs.insert(id, build_func(id, parsed_func)?);
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        ; コメント
        func sample(l0, l1) {
          bb0:
            l2 = int -3
            store l0, l2 ; 上書きされる
            l3 = call.read observe(l0, l1)
            call print()
            if l3 then bb1 else bb2
          bb1:
            l4 = mul l2, l2
            jump bb3
          bb2:
            l5 = load l0
            jump bb3
          bb3:
            l6 = phi [bb1: l4], [bb2: l5]
            nop
            return l6
        }

        func empty() {
          bb0:
            return
        }
        "#;

    #[test]
    fn test_parse_module() {
        let module = parse_module(SAMPLE).unwrap();
        assert_eq!(module.funcs.values().count(), 2);
        let func = &module.funcs[FuncId::from(0)];
        assert_eq!(func.name, "sample");
        assert_eq!(func.bb_entry, BasicBlockId::from(0));
        assert_eq!(
            func.instr(InstrRef::new(BasicBlockId::from(0), 2))
                .map(|instr| instr.kind.memory_effect()),
            Some(MemoryEffect::Read)
        );
        insta::assert_snapshot!(module.to_string(), @r"
        func sample(l0, l1) {
          bb0:
            l2 = int -3
            store l0, l2
            l3 = call.read observe(l0, l1)
            call print()
            if l3 then bb1 else bb2
          bb1:
            l4 = mul l2, l2
            jump bb3
          bb2:
            l5 = load l0
            jump bb3
          bb3:
            l6 = phi [bb1: l4], [bb2: l5]
            nop
            return l6
        }

        func empty() {
          bb0:
            return
        }
        ");
    }

    #[test]
    fn test_display_round_trip() {
        let module = parse_module(SAMPLE).unwrap();
        let printed = module.to_string();
        assert_eq!(parse_module(&printed).unwrap().to_string(), printed);
    }

    #[test]
    fn test_entry_is_first_block() {
        let module = parse_module(
            r#"
            func f() {
              bb2:
                jump bb0
              bb0:
                return
            }
            "#,
        )
        .unwrap();
        let func = &module.funcs[FuncId::from(0)];
        assert_eq!(func.bb_entry, BasicBlockId::from(2));
        assert_eq!(
            func.bb_ids(),
            vec![BasicBlockId::from(2), BasicBlockId::from(0)]
        );
    }

    #[test]
    fn test_entry_survives_round_trip() {
        let input = "func f(l0, l1, l2) {\n  bb1:\n    store l0, l1\n    jump bb0\n  bb0:\n    store l0, l2\n    return\n}\n";
        let module = parse_module(input).unwrap();
        let printed = module.to_string();
        assert_eq!(printed, input);
        let reparsed = parse_module(&printed).unwrap();
        let func = &reparsed.funcs[FuncId::from(0)];
        assert_eq!(func.bb_entry, BasicBlockId::from(1));
        assert_eq!(reparsed.to_string(), input);
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_module("func f(l0) {\n  bb0:\n    l1 = frob l0\n    return\n}\n")
            .err()
            .unwrap();
        assert!(err.0.contains("3:10"), "{}", err);
        assert!(parse_module("func f(l0) {}").is_err());
        assert!(parse_module("func f(l0) { bb0: return } junk").is_err());
        assert!(parse_module("func f() { bb0: l0 = call.maybe g() return }").is_err());
    }

    #[test]
    fn test_semantic_errors() {
        let err = parse_module("func f() { bb0: jump bb5 }").err().unwrap();
        assert_eq!(err.0, "bb0 jumps to undefined block bb5 in f");
        let err = parse_module("func f() { bb0: return bb0: return }")
            .err()
            .unwrap();
        assert_eq!(err.0, "bb0 is defined twice in f");
        let err = parse_module("func f() { bb0: l0 = phi [bb3: l1] return }")
            .err()
            .unwrap();
        assert_eq!(err.0, "phi in bb0 refers to undefined block bb3 in f");
        assert!(parse_module("func f() { bb0: return } func f() { bb0: return }").is_err());
    }
}
