//! Exit-path release of authority segments
//!
//! `unlink_registered` drains every registration in the process, so this
//! lives in its own test binary with a single test.

use shared_channels::{unlink_registered, Channel, ChannelError, ChannelSpec, Role, SlotWidth, Table};

const N: usize = 2;

#[test]
fn test_unlink_registered_takes_participants_down() {
    let _ = env_logger::builder().is_test(true).try_init();
    let name = format!("exit_{}", std::process::id());

    let authority = Table::open(&name, Role::Authority, N, SlotWidth::I16, false).unwrap();
    let participant = Table::open(&name, Role::Participant, N, SlotWidth::I16, false).unwrap();
    let ch = Channel::bind(&participant, 0, ChannelSpec::default()).unwrap();
    ch.write(300).unwrap();

    assert!(unlink_registered() >= 1);

    // Existing attachments see the authority gone, not a silently orphaned table
    assert!(!participant.is_alive());
    assert!(!authority.is_alive());
    assert!(matches!(ch.read(), Err(ChannelError::AuthorityDown)));
    assert!(matches!(ch.write(1), Err(ChannelError::AuthorityDown)));

    assert!(matches!(
        Table::open(&name, Role::Participant, N, SlotWidth::I16, false),
        Err(ChannelError::NoAuthority { .. })
    ));

    // Normal teardown afterwards is still clean
    drop(ch);
    drop(participant);
    drop(authority);
    assert!(matches!(
        Table::open(&name, Role::Participant, N, SlotWidth::I16, false),
        Err(ChannelError::NoAuthority { .. })
    ));
}
