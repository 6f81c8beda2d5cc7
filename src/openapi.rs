use crate::models::{
    AttachPin, Board, BoardDetail, BoardSummary, BoardWithCount, Comment, CommentWithAuthor,
    DeleteMediaRequest, NewBoard, NewComment, NewPin, PageMeta, Pin, PinDetailView, PinPage,
    PinWithMeta, UpdateBoard, User, UserSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_board,
        crate::routes::my_boards,
        crate::routes::get_board,
        crate::routes::update_board,
        crate::routes::delete_board,
        crate::routes::attach_pin,
        crate::routes::detach_pin,
        crate::routes::recent_pins,
        crate::routes::create_pin,
        crate::routes::pin_detail,
        crate::routes::delete_pin,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::like_pin,
        crate::routes::unlike_pin,
        crate::routes::search_pins,
        crate::routes::user_pins,
        crate::routes::upload_media,
        crate::routes::delete_media,
        crate::webhook::identity_webhook,
    ),
    components(schemas(
        User, Pin, Board, Comment,
        NewBoard, UpdateBoard, NewPin, AttachPin, NewComment, DeleteMediaRequest,
        UserSummary, BoardSummary, BoardWithCount, BoardDetail,
        PinWithMeta, PinDetailView, CommentWithAuthor,
        PageMeta, PinPage,
        crate::routes::UploadResponse,
    )),
    tags(
        (name = "boards", description = "Board lifecycle and pin association"),
        (name = "pins", description = "Pin creation, detail, likes and comments"),
        (name = "media", description = "Upload/delete against the external media store"),
    )
)]
pub struct ApiDoc;
