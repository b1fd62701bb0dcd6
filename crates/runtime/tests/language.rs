//! Language semantics across both backends and compare mode: binding
//! forms, closures, macros, laziness, exceptions, dynamic vars,
//! multimethods, and the reference types.

mod common;

use common::{assert_all, ctx_with, eval_str, run_err_on, run_on, ALL_BACKENDS};
use loam_core::diagnostics::ErrorKind;
use loam_runtime::context::Backend;
use loam_runtime::error::EvalError;

// ---------------------------------------------------------------- basics

#[test]
fn test_literals_and_truthiness() {
    assert_all("nil", "nil");
    assert_all("true", "true");
    assert_all("(if 0 :t :f)", ":t");
    assert_all("(if [] :t :f)", ":t");
    assert_all("(if nil :t :f)", ":f");
    assert_all("(if false :t :f)", ":f");
}

#[test]
fn test_arithmetic_semantics() {
    assert_all("(- 10 1 2)", "7");
    assert_all("(- 5)", "-5");
    assert_all("(/ 6 3)", "2");
    assert_all("(/ 1 2)", "0.5");
    assert_all("(+ 1 2.5)", "3.5");
    assert_all("(max 3 1 4 1 5)", "5");
    assert_all("(mod -7 3)", "2");
    assert_all("(rem -7 3)", "-1");
    assert_all("(< 1 2 3)", "true");
    assert_all("(< 1 3 2)", "false");
}

#[test]
fn test_equality_semantics() {
    assert_all("(= 1 1 1)", "true");
    assert_all("(= 1 1.0)", "false");
    assert_all("(= [1 2] '(1 2))", "true");
    assert_all("(= {:a 1 :b 2} {:b 2 :a 1})", "true");
    assert_all("(= #{1 2} #{2 1})", "true");
    assert_all("(not= 1 2)", "true");
}

#[test]
fn test_let_shadowing_and_order() {
    assert_all("(let [x 1 y (+ x 1) x (* y 10)] [x y])", "[20 2]");
}

#[test]
fn test_loop_recur_sum() {
    assert_all(
        "(loop [i 0 acc 0] (if (< i 10) (recur (inc i) (+ acc i)) acc))",
        "45",
    );
}

#[test]
fn test_deep_loop_runs_in_constant_stack() {
    // A recursive (non-recur) version of this would blow the stack long
    // before 200k iterations.
    assert_all(
        "(loop [i 0] (if (< i 200000) (recur (inc i)) i))",
        "200000",
    );
}

#[test]
fn test_self_tail_call_via_fn_recur() {
    assert_all(
        "((fn spin [n] (if (zero? n) :done (recur (dec n)))) 100000)",
        ":done",
    );
}

// ----------------------------------------------------------- destructuring

#[test]
fn test_sequential_destructuring() {
    assert_all(
        "(let [[a b & more :as all] [1 2 3 4]] [a b more (count all)])",
        "[1 2 (3 4) 4]",
    );
}

#[test]
fn test_associative_destructuring() {
    assert_all(
        "(let [{:keys [x y] :or {y 9} :as m} {:x 1}] [x y (count m)])",
        "[1 9 1]",
    );
}

#[test]
fn test_fn_param_destructuring() {
    assert_all("((fn [[a b]] (+ a b)) [3 4])", "7");
    assert_all("((fn [{:keys [w h]}] (* w h)) {:w 3 :h 4})", "12");
}

#[test]
fn test_nested_destructuring() {
    assert_all("(let [[[a] [b c]] [[1] [2 3]]] [a b c])", "[1 2 3]");
}

// ---------------------------------------------------------------- closures

#[test]
fn test_closure_captures_value() {
    assert_all("(let [n 10 add-n (fn [x] (+ x n))] (add-n 5))", "15");
}

#[test]
fn test_closure_over_atom_identity() {
    assert_all(
        "(let [counter (atom 0)
               tick (fn [] (swap! counter inc))]
           (tick) (tick) (tick)
           @counter)",
        "3",
    );
}

#[test]
fn test_nested_closures_capture_transitively() {
    assert_all(
        "(let [a 1]
           (let [f (fn [] (fn [] a))]
             ((f))))",
        "1",
    );
}

#[test]
fn test_multi_arity_fn() {
    assert_all(
        "(let [f (fn ([] 0) ([x] x) ([x & more] (+ x (count more))))]
           [(f) (f 5) (f 5 1 1 1)])",
        "[0 5 8]",
    );
}

#[test]
fn test_variadic_rest_is_nil_when_empty() {
    assert_all("((fn [x & more] [x more]) 1)", "[1 nil]");
}

#[test]
fn test_letfn_mutual_recursion() {
    assert_all(
        "(letfn [(even2? [n] (if (zero? n) true (odd2? (dec n))))
                 (odd2? [n] (if (zero? n) false (even2? (dec n))))]
           [(even2? 10) (odd2? 9)])",
        "[true true]",
    );
}

#[test]
fn test_fn_shorthand() {
    assert_all("(#(+ % %2) 3 4)", "7");
    assert_all("(#(apply + %&) 1 2 3)", "6");
}

// ------------------------------------------------------------------ macros

#[test]
fn test_when_and_cond() {
    assert_all("(when true 1 2 3)", "3");
    assert_all("(when false 1)", "nil");
    assert_all("(cond false 1 :else 2)", "2");
    assert_all("(cond (= 1 2) :no (= 1 1) :yes)", ":yes");
}

#[test]
fn test_case_with_grouped_constants() {
    assert_all("(case 5 (1 2 3) :low (4 5 6) :mid :high)", ":mid");
    assert_all("(case :k :a 1 :k 2 3)", "2");
    assert_all("(case 99 1 :one :fallthrough)", ":fallthrough");
}

#[test]
fn test_condp() {
    assert_all("(condp = 3 1 :one 2 :two 3 :three :none)", ":three");
    assert_all("(condp < 5 10 :small 1 :big)", ":big");
}

#[test]
fn test_and_or_short_circuit() {
    assert_all("(and 1 2 3)", "3");
    assert_all("(and 1 nil 3)", "nil");
    assert_all("(or nil false 3)", "3");
    assert_all(
        "(let [hits (atom 0) spy (fn [v] (swap! hits inc) v)]
           (or (spy 1) (spy 2))
           @hits)",
        "1",
    );
}

#[test]
fn test_threading_macros() {
    assert_all("(-> 5 inc (- 1) (* 2))", "10");
    assert_all("(->> [1 2 3] (map inc) (reduce +))", "9");
    assert_all("(some-> {:a 1} :a inc)", "2");
    assert_all("(some-> {:a 1} :b inc)", "nil");
    assert_all("(as-> 4 x (+ x 1) (* x 2))", "10");
    assert_all("(cond-> 1 true inc false (* 100))", "2");
    assert_all("(cond->> [1 2 3] true (map inc) false (map dec))", "(2 3 4)");
}

#[test]
fn test_if_let_variants() {
    assert_all("(if-let [x 5] (inc x) :none)", "6");
    assert_all("(if-let [x nil] (inc x) :none)", ":none");
    assert_all("(when-let [x 5] (inc x))", "6");
    assert_all("(if-some [x false] :found :none)", ":found");
    assert_all("(if-some [x nil] :found :none)", ":none");
}

#[test]
fn test_for_comprehension() {
    assert_all("(for [x [1 2 3]] (* x x))", "(1 4 9)");
    assert_all("(for [x [1 2 3] y [1 2 3] :when (= x y)] [x y])", "([1 1] [2 2] [3 3])");
    assert_all("(for [x (range 10) :let [y (* x 2)] :when (odd? x)] y)", "(2 6 10 14 18)");
    assert_all("(for [x (range) :while (< x 4)] x)", "(0 1 2 3)");
}

#[test]
fn test_doseq_and_dotimes_side_effects() {
    assert_all(
        "(let [a (atom [])]
           (doseq [x [1 2] y [:a :b]] (swap! a conj [x y]))
           @a)",
        "[[1 :a] [1 :b] [2 :a] [2 :b]]",
    );
    assert_all(
        "(let [a (atom 0)] (dotimes [i 5] (swap! a + i)) @a)",
        "10",
    );
}

#[test]
fn test_while_loop() {
    assert_all(
        "(let [a (atom 0)] (while (< @a 5) (swap! a inc)) @a)",
        "5",
    );
}

#[test]
fn test_defn_with_docstring() {
    assert_all(
        "(defn twice \"doubles\" [x] (* 2 x)) (twice 21)",
        "42",
    );
}

#[test]
fn test_declare_and_forward_reference() {
    assert_all(
        "(declare pong)
         (defn ping [n] (if (zero? n) :ping (pong (dec n))))
         (defn pong [n] (if (zero? n) :pong (ping (dec n))))
         (ping 5)",
        ":pong",
    );
}

// ------------------------------------------------------------------- lazy

#[test]
fn test_lazy_seq_realizes_once() {
    assert_all(
        "(let [calls (atom 0)
               s (map (fn [x] (swap! calls inc) x) [1 2 3])]
           (doall s)
           (doall s)
           @calls)",
        "3",
    );
}

#[test]
fn test_lazy_is_not_eager() {
    assert_all(
        "(let [calls (atom 0)
               s (map (fn [x] (swap! calls inc) x) [1 2 3])]
           (first s)
           @calls)",
        "1",
    );
}

#[test]
fn test_generators() {
    assert_all("(take 4 (iterate (fn [x] (* 2 x)) 1))", "(1 2 4 8)");
    assert_all("(take 3 (repeat :x))", "(:x :x :x)");
    assert_all("(repeat 2 :y)", "(:y :y)");
    assert_all("(take 5 (cycle [1 2]))", "(1 2 1 2 1)");
    assert_all("(range 2 10 3)", "(2 5 8)");
    assert_all("(range 3 0 -1)", "(3 2 1)");
}

#[test]
fn test_transforms() {
    assert_all("(map-indexed (fn [i x] [i x]) [:a :b])", "([0 :a] [1 :b])");
    assert_all("(mapcat (fn [x] [x x]) [1 2])", "(1 1 2 2)");
    assert_all("(take-while odd? [1 3 4 5])", "(1 3)");
    assert_all("(drop-while odd? [1 3 4 5])", "(4 5)");
    assert_all("(remove odd? [1 2 3 4])", "(2 4)");
    assert_all("(concat [1] [] [2 3])", "(1 2 3)");
    assert_all("(drop 2 [1 2 3 4])", "(3 4)");
}

#[test]
fn test_fused_reduce_matches_unfused() {
    // The chained form reduces through the fused path; the doall'd form
    // realizes cells first and reduces generically.
    let fused = "(reduce + 0 (map inc (filter odd? (range 100))))";
    let unfused = "(reduce + 0 (doall (map inc (filter odd? (range 100)))))";
    for backend in ALL_BACKENDS {
        assert_eq!(run_on(backend, fused), run_on(backend, unfused));
    }
    assert_all(fused, "2550");
}

#[test]
fn test_fused_reduce_with_take_over_infinite_source() {
    assert_all("(reduce + 0 (take 10 (range)))", "45");
    assert_all("(reduce + 0 (take 5 (map inc (range))))", "15");
}

#[test]
fn test_reduced_short_circuits() {
    assert_all(
        "(reduce (fn [acc x] (if (>= acc 10) (reduced :enough) (+ acc x))) 0 (range))",
        ":enough",
    );
}

#[test]
fn test_reduce_arities() {
    assert_all("(reduce + [1 2 3 4])", "10");
    assert_all("(reduce + [])", "0");
    assert_all("(reduce + 5 [])", "5");
}

#[test]
fn test_lazy_seq_macro() {
    assert_all(
        "(defn nums [n] (lazy-seq (cons n (nums (inc n)))))
         (take 3 (nums 7))",
        "(7 8 9)",
    );
}

// ------------------------------------------------------------- collections

#[test]
fn test_map_last_association_wins() {
    assert_all("(get (assoc {:k 1} :k 2) :k)", "2");
    assert_all(
        "(let [m (reduce (fn [m i] (assoc m :k i)) {} (range 50))] [(count m) (:k m)])",
        "[1 49]",
    );
}

#[test]
fn test_map_preserves_insertion_order() {
    assert_all("(keys {:b 1 :a 2 :c 3})", "(:b :a :c)");
    assert_all("(assoc {:b 1 :a 2} :b 9)", "{:b 9, :a 2}");
}

#[test]
fn test_collection_operations() {
    assert_all("(conj [1 2] 3)", "[1 2 3]");
    assert_all("(conj '(2 3) 1)", "(1 2 3)");
    assert_all("(conj #{1} 2 2)", "#{1 2}");
    assert_all("(conj {:a 1} [:b 2])", "{:a 1, :b 2}");
    assert_all("(conj nil 1)", "(1)");
    assert_all("(dissoc {:a 1 :b 2} :a)", "{:b 2}");
    assert_all("(contains? {:a nil} :a)", "true");
    assert_all("(contains? #{1 2} 3)", "false");
    assert_all("(nth [1 2 3] 1)", "2");
    assert_all("(nth [1] 5 :missing)", ":missing");
    assert_all("(get \"abc\" 1)", "\\b");
    assert_all("(into [] '(1 2))", "[1 2]");
    assert_all("(into {} [[:a 1] [:b 2]])", "{:a 1, :b 2}");
    assert_all("(vec #{1})", "[1]");
    assert_all("(reverse [1 2 3])", "(3 2 1)");
    assert_all("(last [1 2 3])", "3");
    assert_all("(butlast [1 2 3])", "(1 2)");
}

#[test]
fn test_transients() {
    assert_all(
        "(persistent! (conj! (conj! (transient [1]) 2) 3))",
        "[1 2 3]",
    );
    assert_all(
        "(persistent! (assoc! (transient {:a 1}) :b 2))",
        "{:a 1, :b 2}",
    );
}

#[test]
fn test_sets_as_functions() {
    assert_all("(#{1 2} 2)", "2");
    assert_all("(#{1 2} 3)", "nil");
    assert_all("(filter #{:a :b} [:a :c :b])", "(:a :b)");
}

#[test]
fn test_keywords_and_maps_as_functions() {
    assert_all("(:a {:a 1})", "1");
    assert_all("(:missing {:a 1} :default)", ":default");
    assert_all("({:a 1} :a)", "1");
    assert_all("({:a 1} :b 2)", "2");
}

// --------------------------------------------------------------- exceptions

#[test]
fn test_finally_runs_on_both_paths() {
    assert_all(
        "(let [log (atom [])]
           (try (swap! log conj :body) 1 (finally (swap! log conj :fin)))
           (try (throw (ex-info \"x\" {})) (catch Exception e nil)
                (finally (swap! log conj :fin2)))
           @log)",
        "[:body :fin :fin2]",
    );
}

#[test]
fn test_catch_receives_thrown_value() {
    assert_all(
        "(try (throw (ex-info \"oops\" {:n 1})) (catch Exception e (:n (ex-data e))))",
        "1",
    );
}

#[test]
fn test_runtime_errors_are_catchable() {
    assert_all("(try (/ 1 0) (catch Exception e :caught))", ":caught");
    assert_all("(try (nth [] 5) (catch Exception e :caught))", ":caught");
    assert_all("(try ((fn [x] x)) (catch Exception e :wrong-arity))", ":wrong-arity");
}

#[test]
fn test_uncaught_throw_reaches_the_boundary() {
    for backend in ALL_BACKENDS {
        let err = run_err_on(backend, "(throw (ex-info \"top\" {}))");
        assert!(matches!(err, EvalError::Thrown(_)));
    }
}

#[test]
fn test_nested_try_rethrow() {
    assert_all(
        "(try
           (try (throw (ex-info \"inner\" {})) (finally nil))
           (catch Exception e (ex-message e)))",
        "\"inner\"",
    );
}

// ------------------------------------------------------------ dynamic vars

#[test]
fn test_binding_nests_and_restores() {
    assert_all(
        "(def ^:dynamic *level* 0)
         [(binding [*level* 1]
            [(binding [*level* 2] *level*) *level*])
          *level*]",
        "[[2 1] 0]",
    );
}

#[test]
fn test_binding_pops_on_exception() {
    assert_all(
        "(def ^:dynamic *x* :root)
         (try (binding [*x* :bound] (throw (ex-info \"b\" {})))
              (catch Exception e *x*))",
        ":root",
    );
}

#[test]
fn test_binding_requires_dynamic_var() {
    for backend in ALL_BACKENDS {
        let err = run_err_on(backend, "(def fixed 1) (binding [fixed 2] fixed)");
        match err {
            EvalError::Diag(d) => assert_eq!(d.kind, ErrorKind::Runtime),
            other => panic!("expected a diagnostic, got {:?}", other),
        }
    }
}

#[test]
fn test_with_redefs_restores_root() {
    assert_all(
        "(defn greet [] :real)
         [(with-redefs [greet (fn [] :fake)] (greet)) (greet)]",
        "[:fake :real]",
    );
}

#[test]
fn test_alter_var_root() {
    assert_all(
        "(def counter 0)
         (alter-var-root (var counter) + 5)
         counter",
        "5",
    );
}

// ------------------------------------------------------------------- atoms

#[test]
fn test_atom_validator_rejects() {
    assert_all(
        "(let [a (atom 1)]
           (set-validator! a pos?)
           (try (reset! a -1) (catch Exception e :rejected)))",
        ":rejected",
    );
}

#[test]
fn test_atom_watches_fire_in_order() {
    assert_all(
        "(let [a (atom 0) log (atom [])]
           (add-watch a :w (fn [k r old new] (swap! log conj [old new])))
           (reset! a 1)
           (swap! a inc)
           (remove-watch a :w)
           (reset! a 9)
           @log)",
        "[[0 1] [1 2]]",
    );
}

#[test]
fn test_compare_and_set() {
    assert_all(
        "(let [a (atom 1)]
           [(compare-and-set! a 1 2) (compare-and-set! a 1 3) @a])",
        "[true false 2]",
    );
}

#[test]
fn test_swap_vals_and_reset_vals() {
    assert_all("(swap-vals! (atom 1) inc)", "[1 2]");
    assert_all("(reset-vals! (atom 1) 9)", "[1 9]");
}

// -------------------------------------------------------- other references

#[test]
fn test_volatile() {
    assert_all(
        "(let [v (volatile! 1)] (vswap! v + 10) [(deref v) (vreset! v 0)])",
        "[11 0]",
    );
}

#[test]
fn test_delay_forces_once() {
    assert_all(
        "(let [calls (atom 0)
               d (delay (swap! calls inc) :value)]
           [(realized? d) @d @d @calls (realized? d)])",
        "[false :value :value 1 true]",
    );
}

#[test]
fn test_promise_deliver() {
    assert_all(
        "(let [p (promise)]
           (deliver p 42)
           (deliver p 99)
           @p)",
        "42",
    );
}

#[test]
fn test_undelivered_promise_deref_errors() {
    assert_all("(try @(promise) (catch Exception e :would-block))", ":would-block");
}

// ------------------------------------------------------------ multimethods

#[test]
fn test_multimethod_default_method() {
    assert_all(
        "(defmulti speak :kind)
         (defmethod speak :dog [_] :woof)
         (defmethod speak :default [_] :silence)
         [(speak {:kind :dog}) (speak {:kind :fish})]",
        "[:woof :silence]",
    );
}

#[test]
fn test_multimethod_no_method_errors() {
    assert_all(
        "(defmulti speak :kind)
         (try (speak {:kind :cat}) (catch Exception e :no-method))",
        ":no-method",
    );
}

#[test]
fn test_multimethod_dispatch_fn() {
    assert_all(
        "(defmulti magnitude (fn [n] (if (< n 10) :small :big)))
         (defmethod magnitude :small [n] [:small n])
         (defmethod magnitude :big [n] [:big n])
         [(magnitude 5) (magnitude 50)]",
        "[[:small 5] [:big 50]]",
    );
}

#[test]
fn test_multimethod_management() {
    assert_all(
        "(defmulti m :k)
         (defmethod m :a [_] 1)
         (let [mm @(var m)]
           (prefer-method mm :a :b)
           [(nil? (get-method mm :a)) (count (methods mm))])",
        "[false 1]",
    );
}

// --------------------------------------------------------------- protocols

#[test]
fn test_protocol_multiple_types() {
    assert_all(
        "(defprotocol Sized (size [x]))
         (extend-protocol Sized
           String (size [s] (count s))
           PersistentVector (size [v] (count v))
           Integer (size [_] 1))
         [(size \"abc\") (size [1 2]) (size 9)]",
        "[3 2 1]",
    );
}

#[test]
fn test_satisfies() {
    assert_all(
        "(defprotocol P2 (g [x]))
         (extend-type String P2 (g [s] s))
         [(satisfies? P2 \"s\") (satisfies? P2 1)]",
        "[true false]",
    );
}

#[test]
fn test_protocol_missing_impl_errors() {
    assert_all(
        "(defprotocol P3 (h [x]))
         (try (h 1) (catch Exception e :unimplemented))",
        ":unimplemented",
    );
}

// ------------------------------------------------------------ syntax-quote

#[test]
fn test_syntax_quote_qualifies_symbols() {
    assert_all("(str (first `(+ 1)))", "\"loam.core/+\"");
    assert_all("(str (first `(undefined-thing)))", "\"user/undefined-thing\"");
}

#[test]
fn test_syntax_quote_unquote() {
    assert_all("`[1 ~(+ 1 1) 3]", "[1 2 3]");
    assert_all("`(1 ~@[2 3] 4)", "(1 2 3 4)");
}

#[test]
fn test_auto_gensym_is_consistent_within_expansion() {
    assert_all("(let [[a b] `[x# x#]] (= a b))", "true");
}

// -------------------------------------------------------------- metadata

#[test]
fn test_metadata_round_trip() {
    assert_all("(meta (with-meta [1 2] {:source :test}))", "{:source :test}");
    assert_all("(meta [1 2])", "nil");
    assert_all(
        "(meta (vary-meta (with-meta [1] {:n 1}) assoc :m 2))",
        "{:n 1, :m 2}",
    );
    // Metadata does not affect equality.
    assert_all("(= [1] (with-meta [1] {:x 1}))", "true");
}

// ------------------------------------------------------------------ misc

#[test]
fn test_str_and_pr_str() {
    assert_all("(str \"a\" nil 1 :k)", "\"a1:k\"");
    assert_all("(pr-str \"a\")", "\"\\\"a\\\"\"");
    assert_all("(str \\c)", "\"c\"");
}

#[test]
fn test_apply() {
    assert_all("(apply + [1 2 3])", "6");
    assert_all("(apply + 1 2 [3 4])", "10");
    assert_all("(apply max 1 [7 3])", "7");
}

#[test]
fn test_name_namespace_constructors() {
    assert_all("(name :a/b)", "\"b\"");
    assert_all("(namespace :a/b)", "\"a\"");
    assert_all("(namespace :b)", "nil");
    assert_all("(keyword \"k\")", ":k");
    assert_all("(keyword \"ns\" \"k\")", ":ns/k");
    assert_all("(symbol \"s\")", "s");
}

#[test]
fn test_regex_surface() {
    assert_all("(re-find #\"\\d+\" \"abc123def\")", "\"123\"");
    assert_all("(re-matches #\"\\d+\" \"123\")", "\"123\"");
    assert_all("(re-matches #\"\\d+\" \"a123\")", "nil");
    assert_all("(re-seq #\"\\d\" \"1a2b3\")", "(\"1\" \"2\" \"3\")");
    assert_all("(re-find #\"(a+)(b+)\" \"xaabby\")", "[\"aabb\" \"aa\" \"bb\"]");
}

#[test]
fn test_reader_conditional_and_discard() {
    assert_all("#?(:clj 1 :cljs 2)", "1");
    assert_all("[1 #_2 3]", "[1 3]");
}

#[test]
fn test_vars_are_callable() {
    assert_all("(defn add1 [x] (inc x)) ((var add1) 41)", "42");
}

#[test]
fn test_evaluate_form_entry_point() {
    let mut ctx = ctx_with(Backend::Bytecode);
    let arena = bumpalo::Bump::new();
    let src = &*arena.alloc_str("(* 6 7)");
    let form = loamc::reader::Reader::new(src, &arena, "t.clj".into(), "user".into())
        .read_form()
        .unwrap()
        .unwrap();
    let v = loam_runtime::engine::evaluate_form(&mut ctx, &form, &arena, "t.clj").unwrap();
    assert_eq!(
        loam_runtime::call::pr_str_value(&mut ctx, &v).unwrap(),
        "42"
    );
}

#[test]
fn test_bind_root_and_var_snapshots() {
    use loam_core::value::Value;
    let mut ctx = ctx_with(Backend::Bytecode);
    loam_runtime::engine::bind_root(&mut ctx, "user", "host-value", Value::Int(9));
    assert_eq!(eval_str(&mut ctx, "host-value").unwrap(), "9");

    let snap = loam_runtime::snapshot_vars(&ctx);
    eval_str(&mut ctx, "(def host-value 10)").unwrap();
    assert_eq!(eval_str(&mut ctx, "host-value").unwrap(), "10");
    loam_runtime::restore_vars(&mut ctx, &snap);
    assert_eq!(eval_str(&mut ctx, "host-value").unwrap(), "9");
}

#[test]
fn test_history_vars() {
    for backend in ALL_BACKENDS {
        let mut ctx = ctx_with(backend);
        eval_str(&mut ctx, "(+ 1 1)").unwrap();
        eval_str(&mut ctx, "(+ 2 2)").unwrap();
        assert_eq!(eval_str(&mut ctx, "[*1 *2]").unwrap(), "[4 2]");
    }
}

#[test]
fn test_error_kinds_at_the_boundary() {
    for backend in [Backend::TreeWalk, Backend::Bytecode] {
        match run_err_on(backend, "(unknown-symbol-here)") {
            EvalError::Diag(d) => assert_eq!(d.kind, ErrorKind::Analysis),
            other => panic!("expected analysis error, got {:?}", other),
        }
        match run_err_on(backend, "(1 2") {
            EvalError::Diag(d) => assert_eq!(d.kind, ErrorKind::Parse),
            other => panic!("expected parse error, got {:?}", other),
        }
        match run_err_on(backend, "(recur 1)") {
            EvalError::Diag(d) => assert_eq!(d.kind, ErrorKind::Analysis),
            other => panic!("expected analysis error, got {:?}", other),
        }
    }
}

#[test]
fn test_recur_arity_is_checked() {
    match run_err_on(Backend::Bytecode, "(loop [a 1 b 2] (recur 1))") {
        EvalError::Diag(d) => {
            assert_eq!(d.kind, ErrorKind::Analysis);
            assert!(d.message.contains("recur"));
        }
        other => panic!("expected analysis error, got {:?}", other),
    }
}
