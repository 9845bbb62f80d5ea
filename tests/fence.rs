use anyhow::Result;

use vulkan_rhi::FenceState;

mod framework;

#[test]
pub fn fences_are_reused() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let fences = device.fence_manager();

    for _ in 0..16 {
        let fence = fences.allocate_fence()?;
        assert_eq!(fences.get_fence_state(&fence)?, FenceState::NotReady);
        fences.release_fence(fence)?;
    }

    assert_eq!(fences.num_created()?, 1, "Released fences should be handed out again.");
    assert_eq!(fences.num_used()?, 0);
    assert_eq!(fences.num_free()?, 1);
    Ok(())
}

#[test]
pub fn simultaneous_fences_are_distinct() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let fences = device.fence_manager();

    let a = fences.allocate_fence()?;
    let b = fences.allocate_fence()?;
    assert_ne!(a, b);
    assert_ne!(unsafe { fences.handle(&a)? }, unsafe { fences.handle(&b)? });
    assert_eq!(fences.num_created()?, 2);

    fences.release_fence(a)?;
    fences.release_fence(b)?;
    fences.deinit()?;
    assert_eq!(fences.num_created()?, 0);
    Ok(())
}

#[test]
pub fn release_fence_slot_empties_slot() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let fences = device.fence_manager();

    let mut slot = Some(fences.allocate_fence()?);
    fences.release_fence_slot(&mut slot)?;
    assert!(slot.is_none());
    // Releasing an empty slot is a no-op.
    fences.release_fence_slot(&mut slot)?;
    assert_eq!(fences.num_used()?, 0);
    assert_eq!(fences.num_free()?, 1);
    Ok(())
}

#[test]
pub fn deinit_with_fences_in_use_fails() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let fences = device.fence_manager();

    let fence = fences.allocate_fence()?;
    assert!(fences.deinit().is_err());
    fences.release_fence(fence)?;
    fences.deinit()?;
    Ok(())
}

#[test]
pub fn unsubmitted_wait_times_out() -> Result<()> {
    let (device, _backend) = framework::make_device()?;
    let fences = device.fence_manager();

    let fence = fences.allocate_fence()?;
    assert!(!fences.wait_for_fence(&fence, 1000)?, "Nothing signals this fence, the wait should time out.");
    assert!(!fences.check_fence_state(&fence)?);
    fences.release_fence(fence)?;
    Ok(())
}
