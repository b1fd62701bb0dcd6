//! End-to-end scenarios, each verified under the tree-walker, the
//! bytecode VM, and compare mode.

mod common;

use common::assert_all;

#[test]
fn test_variadic_addition() {
    assert_all("(+ 1 2 3)", "6");
}

#[test]
fn test_named_fn_recursion_factorial() {
    assert_all(
        "((fn fact [n] (if (<= n 1) 1 (* n (fact (- n 1))))) 5)",
        "120",
    );
}

#[test]
fn test_lazy_pipeline_over_infinite_range() {
    assert_all(
        "(take 5 (filter odd? (map (fn [x] (* x x)) (range))))",
        "(1 9 25 49 81)",
    );
}

#[test]
fn test_atom_swaps_in_dotimes() {
    assert_all(
        "(let [a (atom 0)] (dotimes [_ 1000] (swap! a inc)) @a)",
        "1000",
    );
}

#[test]
fn test_ex_info_throw_and_catch() {
    assert_all(
        "(try (throw (ex-info \"boom\" {:code 42}))
              (catch Exception e [(ex-message e) (:code (ex-data e))]))",
        "[\"boom\" 42]",
    );
}

#[test]
fn test_protocol_dispatch_on_string() {
    assert_all(
        "(defprotocol P (f [x]))
         (extend-type String P (f [s] (count s)))
         (f \"hello\")",
        "5",
    );
}

#[test]
fn test_multimethod_dispatch_on_keyword() {
    assert_all(
        "(defmulti area :shape)
         (defmethod area :circle [c] (* 3 (:r c) (:r c)))
         (defmethod area :rect [r] (* (:w r) (:h r)))
         (area {:shape :rect :w 3 :h 4})",
        "12",
    );
}
