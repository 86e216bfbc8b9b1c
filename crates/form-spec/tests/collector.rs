use std::sync::Arc;

use form_spec::{
    Answer, AnswerCollector, AutoLink, BlockId, CollectError, FormConfig, FormTemplate, OptionId,
    ResolvedForm, Selection, StepState,
};

fn fixture(name: &str) -> &'static str {
    match name {
        "root_form" => include_str!("fixtures/root_form.json"),
        "hide_phone" => include_str!("fixtures/hide_phone.json"),
        "hide_contact_step" => include_str!("fixtures/hide_contact_step.json"),
        _ => panic!("unknown fixture {}", name),
    }
}

fn form(config: Option<&str>) -> ResolvedForm {
    let template: FormTemplate = serde_json::from_str(fixture("root_form")).expect("template");
    let config = match config {
        Some(name) => serde_json::from_str(fixture(name)).expect("config"),
        None => FormConfig::unconfigured(),
    };
    ResolvedForm::new(Arc::new(template), Arc::new(config), &AutoLink::default())
}

fn answer_first_step(collector: &mut AnswerCollector) {
    collector
        .select(BlockId(101), OptionId(1003))
        .expect("satisfaction");
    collector
        .select(BlockId(102), OptionId(1012))
        .expect("difficulties");
}

#[test]
fn walks_through_the_form_with_a_conditional_follow_up() {
    let mut collector = AnswerCollector::new(form(None));
    answer_first_step(&mut collector);
    assert_eq!(collector.advance(), Ok(Some(1)));

    collector
        .select(BlockId(200), OptionId(2003))
        .expect("phone channel");
    assert!(collector.is_live_reachable(BlockId(203)));
    assert!(!collector.is_live_reachable(BlockId(202)));

    let validation = collector.validate_step(1);
    assert!(!validation.valid);
    assert_eq!(validation.missing_required, vec!["contact_reached_phone"]);

    collector
        .select(BlockId(203), OptionId(2031))
        .expect("reached by phone");
    assert_eq!(collector.advance(), Ok(Some(2)));
    assert!(collector.is_last_step());
    assert_eq!(collector.advance(), Ok(None));

    let answers = collector.answers();
    assert!(answers.iter().any(|answer| {
        answer.field_code == "contact_reached_phone" && answer.answer_item_id == Some(OptionId(2031))
    }));
    assert_eq!(answers.len(), 4);
}

#[test]
fn exclusive_option_clears_siblings_and_is_cleared_by_them() {
    let mut collector = AnswerCollector::new(form(None));
    collector.select(BlockId(200), OptionId(2002)).unwrap();
    collector.select(BlockId(200), OptionId(2003)).unwrap();
    assert_eq!(
        collector.selected_options(BlockId(200)),
        vec![OptionId(2002), OptionId(2003)]
    );

    collector.select(BlockId(200), OptionId(2001)).unwrap();
    assert_eq!(collector.selected_options(BlockId(200)), vec![OptionId(2001)]);

    collector.select(BlockId(200), OptionId(2004)).unwrap();
    assert_eq!(collector.selected_options(BlockId(200)), vec![OptionId(2004)]);
}

#[test]
fn unchecking_a_parent_discards_stale_answers() {
    let mut collector = AnswerCollector::new(form(None));
    collector.select(BlockId(200), OptionId(2003)).unwrap();
    collector.select(BlockId(203), OptionId(2031)).unwrap();
    assert!(collector.selection(BlockId(203)).is_some());

    collector.deselect(BlockId(200), OptionId(2003)).unwrap();
    assert!(collector.selection(BlockId(203)).is_none());
    assert!(
        collector
            .answers()
            .iter()
            .all(|answer| answer.block_id != BlockId(203))
    );

    collector.select(BlockId(200), OptionId(2003)).unwrap();
    collector.select(BlockId(203), OptionId(2032)).unwrap();
    collector.select(BlockId(200), OptionId(2001)).unwrap();
    assert!(collector.selection(BlockId(203)).is_none());
}

#[test]
fn free_text_follow_up_is_discarded_with_its_parent() {
    let mut collector = AnswerCollector::new(form(None));
    collector.select(BlockId(102), OptionId(1013)).unwrap();
    collector
        .set_other_text(BlockId(102), OptionId(1013), "Formulaire illisible")
        .unwrap();
    collector.set_text(BlockId(103), "Trop de champs").unwrap();

    let answers = collector.step_answers(0);
    assert!(answers.iter().any(|answer| {
        answer.answer_item_id == Some(OptionId(1013))
            && answer.answer_text.as_deref() == Some("Formulaire illisible")
    }));
    assert!(answers.iter().any(|answer| answer.field_code == "difficulties_details"));

    collector.deselect(BlockId(102), OptionId(1013)).unwrap();
    assert!(collector.selection(BlockId(103)).is_none());
}

#[test]
fn required_answers_gate_navigation() {
    let mut collector = AnswerCollector::new(form(None));
    assert!(!collector.can_continue());
    assert_eq!(
        collector.advance(),
        Err(CollectError::StepIncomplete {
            step: 0,
            missing: vec!["satisfaction".into(), "difficulties".into()],
        })
    );
    assert_eq!(collector.current_step(), 0);

    assert!(matches!(
        collector.go_to(2),
        Err(CollectError::StepIncomplete { step: 0, .. })
    ));

    answer_first_step(&mut collector);
    assert!(collector.can_continue());
    assert_eq!(collector.advance(), Ok(Some(1)));
    assert_eq!(collector.back(), Some(0));
    assert_eq!(
        collector.selection(BlockId(101)),
        Some(&Selection::Single(form_spec::ChoiceItem::new(OptionId(1003))))
    );
}

#[test]
fn step_state_follows_answers_and_submission() {
    let mut collector = AnswerCollector::new(form(None));
    assert_eq!(collector.step_state(0), StepState::Unanswered);

    collector.select(BlockId(101), OptionId(1002)).unwrap();
    assert_eq!(collector.step_state(0), StepState::PartiallyAnswered);

    collector.select(BlockId(102), OptionId(1011)).unwrap();
    assert_eq!(collector.step_state(0), StepState::Valid);

    collector.mark_submitted(0);
    assert_eq!(collector.step_state(0), StepState::Submitted);

    collector.select(BlockId(101), OptionId(1001)).unwrap();
    assert_eq!(collector.step_state(0), StepState::Valid);
}

#[test]
fn hidden_option_and_its_children_refuse_input() {
    let mut collector = AnswerCollector::new(form(Some("hide_phone")));
    assert_eq!(
        collector.select(BlockId(200), OptionId(2003)),
        Err(CollectError::OptionHidden(OptionId(2003)))
    );
    assert_eq!(
        collector.select(BlockId(203), OptionId(2031)),
        Err(CollectError::BlockUnreachable(BlockId(203)))
    );
}

#[test]
fn hidden_step_is_skipped() {
    let mut collector = AnswerCollector::new(form(Some("hide_contact_step")));
    answer_first_step(&mut collector);
    assert_eq!(collector.advance(), Ok(Some(2)));
    assert_eq!(collector.go_to(1), Err(CollectError::StepHidden(1)));
    assert_eq!(collector.go_to(7), Err(CollectError::StepOutOfRange(7)));
}

#[test]
fn rejects_input_of_the_wrong_shape() {
    let mut collector = AnswerCollector::new(form(None));
    assert_eq!(
        collector.set_text(BlockId(101), "bien"),
        Err(CollectError::WrongInput {
            block: BlockId(101),
            expected: "an option",
        })
    );
    assert_eq!(
        collector.select(BlockId(100), OptionId(1001)),
        Err(CollectError::NotAnswerable(BlockId(100)))
    );
    assert_eq!(
        collector.select(BlockId(101), OptionId(2001)),
        Err(CollectError::UnknownOption {
            block: BlockId(101),
            option: OptionId(2001),
        })
    );
    collector.select(BlockId(102), OptionId(1012)).unwrap();
    assert_eq!(
        collector.set_other_text(BlockId(102), OptionId(1012), "texte"),
        Err(CollectError::NotOtherOption(OptionId(1012)))
    );
}

#[test]
fn blank_text_clears_the_answer() {
    let mut collector = AnswerCollector::new(form(None));
    collector.set_text(BlockId(300), "Très pratique").unwrap();
    assert!(collector.selection(BlockId(300)).is_some());
    collector.set_text(BlockId(300), "   ").unwrap();
    assert!(collector.selection(BlockId(300)).is_none());
}

#[test]
fn restoring_answers_drops_stale_ones() {
    let answers = vec![
        Answer {
            block_id: BlockId(200),
            field_code: "contact_channels".into(),
            answer_item_id: Some(OptionId(2002)),
            answer_text: None,
        },
        Answer {
            block_id: BlockId(203),
            field_code: "contact_reached_phone".into(),
            answer_item_id: Some(OptionId(2031)),
            answer_text: None,
        },
    ];
    let collector = AnswerCollector::from_answers(form(None), &answers);

    assert_eq!(collector.selected_options(BlockId(200)), vec![OptionId(2002)]);
    assert!(collector.selection(BlockId(203)).is_none());
}

#[test]
fn step_batch_lists_blocks_without_answers() {
    let mut collector = AnswerCollector::new(form(None));
    answer_first_step(&mut collector);
    collector.select(BlockId(200), OptionId(2003)).unwrap();
    collector.select(BlockId(203), OptionId(2031)).unwrap();

    let batch = collector.step_batch(1);
    assert_eq!(batch.step_index, 1);
    assert_eq!(batch.config_version, 0);
    assert_eq!(batch.answers.len(), 2);
    for cleared in [202, 204, 205, 103, 300] {
        assert!(batch.cleared_blocks.contains(&BlockId(cleared)));
    }
    for answered in [101, 102, 200, 203] {
        assert!(!batch.cleared_blocks.contains(&BlockId(answered)));
    }
}

#[test]
fn form_batch_carries_answers_of_every_step() {
    let mut collector = AnswerCollector::new(form(None));
    answer_first_step(&mut collector);
    collector.select(BlockId(200), OptionId(2001)).unwrap();

    let batch = collector.form_batch(1);
    assert_eq!(batch.step_index, 1);
    let blocks: Vec<_> = batch.answers.iter().map(|answer| answer.block_id).collect();
    assert_eq!(blocks, vec![BlockId(101), BlockId(102), BlockId(200)]);
    assert_eq!(batch.cleared_blocks, collector.step_batch(1).cleared_blocks);
}

#[test]
fn unreachable_required_blocks_do_not_hold_the_step() {
    let mut collector = AnswerCollector::new(form(None));
    answer_first_step(&mut collector);
    assert_eq!(collector.advance(), Ok(Some(1)));

    collector.select(BlockId(200), OptionId(2001)).unwrap();
    for child in [202, 203, 204] {
        let block = collector.form().template().block(BlockId(child)).unwrap();
        assert!(block.is_required);
        assert!(!collector.is_live_reachable(BlockId(child)));
    }
    assert!(collector.can_continue());
    assert_eq!(collector.advance(), Ok(Some(2)));
}

#[test]
fn progress_counts_revealed_blocks() {
    let mut collector = AnswerCollector::new(form(None));
    assert_eq!(collector.progress(), (0, 5));

    collector.select(BlockId(200), OptionId(2003)).unwrap();
    assert_eq!(collector.progress(), (1, 6));
}
