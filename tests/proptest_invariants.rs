//! Property-based invariants that must hold for any sequence of
//! inserts: the classifier never returns a rule lower-priority than
//! one that visibly matches the flow.

use classifier_core::{Classifier, ClassifierConfig, FieldId, Flow, Mask, MiniMatch, Rule};
use proptest::prelude::*;

fn port_rule(priority: i64, port: u64) -> Rule {
    let mask = Mask::new().with_exact(FieldId::InPort);
    Rule::new(priority, MiniMatch::new(mask).with_value(FieldId::InPort, port))
}

proptest! {
    #[test]
    fn lookup_always_returns_the_highest_visible_priority(
        entries in prop::collection::vec((0i64..1000, 0u64..16), 1..40)
    ) {
        let c = Classifier::new(&ClassifierConfig::default()).unwrap();
        let mut best_per_port: std::collections::HashMap<u64, i64> = std::collections::HashMap::new();
        let mut version = 0u64;

        for (priority, port) in &entries {
            version += 1;
            if c.insert(port_rule(*priority, *port), version).is_ok() {
                let best = best_per_port.entry(*port).or_insert(i64::MIN);
                if *priority > *best {
                    *best = *priority;
                }
            }
        }

        for port in 0u64..16 {
            let flow = Flow::new().set(FieldId::InPort, port);
            let expected = best_per_port.get(&port).copied();
            let actual = c.lookup(version, &flow).rule.map(|r| r.priority);
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn removing_every_inserted_rule_empties_the_classifier(
        ports in prop::collection::vec(0u64..100, 1..30)
    ) {
        let c = Classifier::new(&ClassifierConfig::default()).unwrap();
        let mut handles = Vec::new();
        for (i, port) in ports.iter().enumerate() {
            if let Ok(rule) = c.insert(port_rule(i as i64, *port), i as u64 + 1) {
                handles.push(rule);
            }
        }
        for rule in &handles {
            c.remove(rule);
        }
        prop_assert!(c.is_empty());
    }

    #[test]
    fn wildcards_only_ever_grow_monotonically_with_more_constrained_rules(
        port in 0u64..16
    ) {
        let c = Classifier::new(&ClassifierConfig::default()).unwrap();
        c.insert(port_rule(1, port), 1).unwrap();
        let flow = Flow::new().set(FieldId::InPort, port);
        let first = c.lookup(1, &flow).wildcards;

        let mask = Mask::new().with_exact(FieldId::InPort).with_exact(FieldId::TpDst);
        let matc = MiniMatch::new(mask).with_value(FieldId::InPort, port).with_value(FieldId::TpDst, 80);
        c.insert(Rule::new(2, matc), 2).unwrap();
        let flow2 = Flow::new().set(FieldId::InPort, port).set(FieldId::TpDst, 80);
        let second = c.lookup(2, &flow2).wildcards;

        prop_assert!(second.bits_for(FieldId::TpDst) >= first.bits_for(FieldId::TpDst));
    }
}
